//! Identity/profile lookup.
//!
//! Resolves display metadata for a party id so a rendering surface can show
//! who is calling. Read-only: nothing here affects session state.

use async_trait::async_trait;
use common::types::PartyId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display metadata for a call participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyProfile {
    pub party_id: PartyId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl PartyProfile {
    #[must_use]
    pub fn new(party_id: PartyId, display_name: impl Into<String>) -> Self {
        Self {
            party_id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

/// Source of party profiles.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// `None` if the party is unknown.
    async fn lookup(&self, party_id: &PartyId) -> Option<PartyProfile>;
}

/// In-memory directory, populated up front.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileDirectory {
    profiles: HashMap<PartyId, PartyProfile>,
}

impl StaticProfileDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_profiles(profiles: impl IntoIterator<Item = PartyProfile>) -> Self {
        let mut directory = Self::new();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    #[must_use]
    pub fn with_profile(mut self, profile: PartyProfile) -> Self {
        self.insert(profile);
        self
    }

    /// Insert or replace the profile for `profile.party_id`.
    pub fn insert(&mut self, profile: PartyProfile) {
        self.profiles.insert(profile.party_id.clone(), profile);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileDirectory for StaticProfileDirectory {
    async fn lookup(&self, party_id: &PartyId) -> Option<PartyProfile> {
        self.profiles.get(party_id).cloned()
    }
}
