//! Skill catalog
//!
//! Providers publish skills here; bookings copy an immutable snapshot at
//! creation time, so later edits never touch in-flight sessions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use skillmesh_types::{Amount, MarketError, Result, Skill, SkillId, UserId};

/// The skill listing store
#[derive(Clone, Default)]
pub struct SkillCatalog {
    skills: Arc<RwLock<HashMap<SkillId, Skill>>>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new skill listing
    pub async fn publish(
        &self,
        provider: UserId,
        title: &str,
        description: &str,
        price: Amount,
        duration_minutes: u32,
    ) -> Result<Skill> {
        if title.trim().is_empty() {
            return Err(MarketError::invalid_input("title", "must not be empty"));
        }
        if duration_minutes == 0 {
            return Err(MarketError::invalid_input(
                "duration_minutes",
                "must be greater than zero",
            ));
        }
        if !price.is_positive() {
            return Err(MarketError::invalid_input(
                "price",
                "must be greater than zero",
            ));
        }

        let skill = Skill {
            id: SkillId::new(),
            provider,
            title: title.to_string(),
            description: description.to_string(),
            price,
            duration_minutes,
            active: true,
            created_at: Utc::now(),
        };
        self.skills.write().await.insert(skill.id, skill.clone());
        Ok(skill)
    }

    /// Get a skill that is still accepting bookings
    pub async fn bookable(&self, skill_id: &SkillId) -> Result<Skill> {
        let skills = self.skills.read().await;
        skills
            .get(skill_id)
            .filter(|s| s.active)
            .cloned()
            .ok_or_else(|| MarketError::SkillNotFound {
                skill_id: skill_id.to_string(),
            })
    }

    /// Get a skill regardless of its active flag
    pub async fn get(&self, skill_id: &SkillId) -> Result<Skill> {
        let skills = self.skills.read().await;
        skills
            .get(skill_id)
            .cloned()
            .ok_or_else(|| MarketError::SkillNotFound {
                skill_id: skill_id.to_string(),
            })
    }

    /// Activate or deactivate a listing
    pub async fn set_active(&self, skill_id: &SkillId, active: bool) -> Result<()> {
        let mut skills = self.skills.write().await;
        let skill = skills
            .get_mut(skill_id)
            .ok_or_else(|| MarketError::SkillNotFound {
                skill_id: skill_id.to_string(),
            })?;
        skill.active = active;
        Ok(())
    }

    /// Reprice a listing; in-flight bookings keep their snapshot price
    pub async fn update_price(&self, skill_id: &SkillId, price: Amount) -> Result<()> {
        if !price.is_positive() {
            return Err(MarketError::invalid_input(
                "price",
                "must be greater than zero",
            ));
        }
        let mut skills = self.skills.write().await;
        let skill = skills
            .get_mut(skill_id)
            .ok_or_else(|| MarketError::SkillNotFound {
                skill_id: skill_id.to_string(),
            })?;
        skill.price = price;
        Ok(())
    }

    /// Listings for a provider
    pub async fn by_provider(&self, provider: &UserId) -> Vec<Skill> {
        let skills = self.skills.read().await;
        skills
            .values()
            .filter(|s| s.provider == *provider)
            .cloned()
            .collect()
    }
}
