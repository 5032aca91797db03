//! Public course marketplace, seen only through the unlisting it must support.

use async_trait::async_trait;

use crate::error::MasteryResult;

/// The public course listing service.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Remove a course's public listing.
    async fn unlist(&self, course_id: &str) -> MasteryResult<()>;
}
