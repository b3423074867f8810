//! User lookup port, used to put a name on the winner

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::SupabaseClient;
use super::PortError;

/// Minimal public view of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_summary(&self, user_id: Uuid) -> Result<Option<UserSummary>, PortError>;
}

/// Row of the `profiles` table
#[derive(Debug, Clone, Deserialize)]
struct ProfileRow {
    id: Uuid,
    display_name: Option<String>,
}

/// Reads display names from the Supabase `profiles` table
#[derive(Clone)]
pub struct SupabaseUserDirectory {
    client: SupabaseClient,
}

impl SupabaseUserDirectory {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UserDirectory for SupabaseUserDirectory {
    async fn user_summary(&self, user_id: Uuid) -> Result<Option<UserSummary>, PortError> {
        let query = format!("id=eq.{}&select=id,display_name", user_id);
        let row: Option<ProfileRow> = self.client.get_one("profiles", &query).await?;
        Ok(row.and_then(|r| {
            r.display_name.map(|username| UserSummary {
                id: r.id,
                username,
            })
        }))
    }
}

/// Fixed set of users, for development and tests
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<Uuid, String>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Uuid, username: impl Into<String>) {
        self.users.insert(user_id, username.into());
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn user_summary(&self, user_id: Uuid) -> Result<Option<UserSummary>, PortError> {
        Ok(self.users.get(&user_id).map(|name| UserSummary {
            id: user_id,
            username: name.value().clone(),
        }))
    }
}
