//! Persistence and user-lookup ports with their Supabase and in-memory adapters

pub mod matches;
pub mod profiles;
pub mod supabase;

pub use matches::{InMemoryMatchStore, MatchRecord, MatchRepository, SupabaseMatchStore};
pub use profiles::{InMemoryUserDirectory, SupabaseUserDirectory, UserDirectory, UserSummary};
pub use supabase::{SupabaseClient, SupabaseError};

/// Failure of an external port (store or user lookup)
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Supabase request failed: {0}")]
    Supabase(#[from] SupabaseError),

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
