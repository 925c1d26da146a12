//! Core value types shared by the ingestion, build and delivery stages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(
    /// Stable identifier of a post in the content source
    PostId
);

id_newtype!(
    /// Identifier of a message at the messaging destination
    MessageId
);

/// A downloadable archive attached to a post
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRef {
    /// Download location
    pub uri: Url,
    /// Size announced by the source, in bytes (0 when unknown)
    pub declared_size: u64,
    /// File name shown by the source
    pub display_name: String,
}

/// A single audio track attached directly to a post
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRef {
    /// Download location
    pub uri: Url,
    /// Track title as reported by the source
    pub title: String,
    /// Track artist as reported by the source
    pub artist: String,
    /// Track length
    pub duration_seconds: u32,
}

/// One feed item to be mirrored
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePost {
    /// Stable, unique post id
    pub id: PostId,
    /// Post body
    pub text: String,
    /// Photo reference (URL or destination-side file id)
    pub photo: Option<String>,
    /// Archives, in source order
    #[serde(default)]
    pub archives: Vec<ArchiveRef>,
    /// Directly attached audio tracks, in source order
    #[serde(default)]
    pub audios: Vec<AudioRef>,
    /// Post restricted to paying subscribers; never mirrored
    #[serde(default)]
    pub is_private_tier: bool,
}

/// Comment under a post
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Whether the comment was written by the post author
    pub from_author: bool,
    /// Comment body
    pub text: String,
    /// Archives attached to the comment
    #[serde(default)]
    pub archives: Vec<ArchiveRef>,
}

/// One page of the feed
#[derive(Clone, Debug, Default)]
pub struct FeedPage {
    /// Total number of posts in the feed
    pub total: u64,
    /// Posts on this page, newest first
    pub posts: Vec<SourcePost>,
}

/// Long-poll position
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    /// Session key
    pub key: String,
    /// Long-poll server endpoint
    pub server: String,
    /// Last event token
    pub token: String,
}

/// Result of one long-poll request
#[derive(Clone, Debug)]
pub enum PollOutcome {
    /// New events arrived; the cursor advances to `token`
    Events {
        /// Next event token
        token: String,
        /// Newly published posts
        posts: Vec<SourcePost>,
    },
    /// Benign upstream condition (e.g. nothing new); keep polling
    Idle {
        /// Replacement token, when the source supplied one
        token: Option<String>,
    },
    /// The cursor is no longer valid and a fresh handshake is needed
    CursorExpired,
}

/// Tags read from an audio file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioTags {
    /// Track title
    pub title: Option<String>,
    /// Track artist (performers, falling back to album artists)
    pub artist: Option<String>,
    /// Track length
    pub duration_seconds: u32,
}

/// What kind of media a [`MediaItem`] is sent as
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaKind {
    /// Playable audio with display metadata
    Audio {
        /// Track title
        title: Option<String>,
        /// Track performer
        performer: Option<String>,
        /// Track length
        duration_seconds: u32,
    },
    /// Generic file attachment
    Document,
}

/// A file to be uploaded to the messaging destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    /// Path of the file as seen by the destination's upload server
    pub server_path: PathBuf,
    /// How the file is presented
    pub kind: MediaKind,
}
