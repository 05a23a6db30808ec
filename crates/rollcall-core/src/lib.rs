//! rollcall-core: identity matching and daily attendance engine.
//!
//! Matches probe face embeddings against an enrolled reference store by
//! Euclidean nearest neighbor, and records each identity at most once per
//! calendar day in a CSV ledger. Face detection and embedding are external
//! collaborators behind the traits in [`face`].

pub mod enrollment;
pub mod face;
pub mod ledger;
pub mod matcher;
pub mod store;
pub mod types;

pub use enrollment::{mean_embedding, EnrollmentBuilder, EnrollmentError, EnrollmentSet};
pub use face::{FaceDetector, FaceEmbedder};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError};
pub use matcher::{DimensionMismatch, EuclideanMatcher, Matcher};
pub use store::{EmbeddingStore, StoreError};
pub use types::{BoundingBox, Embedding, MatchResult, UNKNOWN};
