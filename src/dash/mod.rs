pub mod hls_from_mpd;
pub mod model;
pub mod rewriter;

pub use hls_from_mpd::{master_playlist_from_mpd, media_playlist_from_mpd, DecryptParams, HlsFromMpdContext};
pub use model::{parse_mpd, AdaptationSet, Mpd, Representation, SegmentTemplateInfo};
pub use rewriter::{rewrite_mpd, ClearKeyInjection, MpdRewriteContext};
