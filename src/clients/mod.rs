//! Collaborator interfaces for the content source and the messaging destination
//!
//! The mirror never speaks a wire protocol itself. It drives four seams that the
//! embedding application fills in:
//!
//! - [`SourceClient`]: feed pages, comments and long-poll events
//! - [`MessagingClient`]: uploads, deletions and admin notices at the destination
//! - [`TextNormalizer`]: repair of mis-decoded archive entry names
//! - [`MetadataReader`]: audio tag extraction
//!
//! [`IdentityNormalizer`] and [`NoOpMetadataReader`] are provided for setups that
//! have no better implementation; with the latter every track falls back to its
//! file name.

mod noop;
mod traits;

pub use noop::{IdentityNormalizer, NoOpMetadataReader};
pub use traits::{MessagingClient, MetadataReader, SourceClient, TextNormalizer};
