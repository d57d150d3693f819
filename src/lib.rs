//! snapdiff - btrfs send stream to container layer changes.
//!
//! ```no_run
//! # async fn demo() -> snapdiff::error::Result<()> {
//! let file = tokio::fs::File::open("layer.stream").await?;
//! for change in snapdiff::decode_send_stream(file).await? {
//!     println!("{}", change);
//! }
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod config;
pub mod error;
pub mod streaming;
pub mod transport;

pub use changes::{normalize, Change, ChangeKind};
pub use error::{DiffError, Result};
pub use streaming::{decode_send_stream, read_send_stream};
