pub mod rewriter;

pub use rewriter::{rewrite_hls, RewriteContext};
