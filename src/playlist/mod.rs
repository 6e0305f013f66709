//! M3U playlist composer (§4.9): merges several remote M3U playlists into
//! one, rewriting each channel URL through the proxy and folding per-item
//! `#KODIPROP`/`#EXTVLCOPT`/`#EXTHTTP` directives into that rewrite.

pub mod composer;

pub use composer::{compose, parse_definitions, ComposeContext, PlaylistDefinition, PlaylistInput};
