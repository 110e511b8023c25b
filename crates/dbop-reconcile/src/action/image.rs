//! Committing a new deployment image

use super::{ActionEnv, ActionHandler, Progress};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use dbop_types::Action;
use tracing::{debug, info};

/// Makes the action's image the deployment's current image once its
/// metadata has been discovered.
///
/// Waits for as long as discovery takes; only the action timeout ends the
/// wait.
pub struct SetCurrentImage;

#[async_trait]
impl ActionHandler for SetCurrentImage {
    async fn start(&self, action: &mut Action, env: &mut ActionEnv<'_>) -> Result<bool> {
        match self.check_progress(action, env).await? {
            Progress::Ready => Ok(true),
            Progress::Pending => Ok(false),
            Progress::Abort(reason) => Err(ReconcileError::aborted(action.action_type, reason)),
        }
    }

    async fn check_progress(
        &self,
        action: &mut Action,
        env: &mut ActionEnv<'_>,
    ) -> Result<Progress> {
        let Some(image) = action.image.as_deref() else {
            return Ok(Progress::Abort("no image given".into()));
        };
        let Some(info) = env.status.images.get_by_image(image).cloned() else {
            debug!(image, "Image metadata not discovered yet");
            return Ok(Progress::Pending);
        };
        info!(
            image,
            image_id = %info.image_id,
            version = %info.version,
            "Current image changed"
        );
        env.status.current_image = Some(info);
        Ok(Progress::Ready)
    }
}
