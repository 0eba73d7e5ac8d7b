//! Host file detection and filtering.
//!
//! [`FileResolver`] decides which command line tokens are host paths and
//! how they are named inside the container. [`FileMatcher`] implements the
//! `*`-glob include/exclude filters used for both upload and download.

mod lexer;
mod matcher;
mod resolver;

pub use lexer::{Fragment, split_fragments};
pub use matcher::FileMatcher;
pub use resolver::{FileResolver, ResolveOptions, UploadEntry, archive_name};
