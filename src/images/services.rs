use anyhow::Context;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    state::AppState,
    users::{repo_types::User, validators::ImageUpload},
};

/// Lifetime of the presigned URLs handed to clients.
pub const PRESIGN_TTL_SECS: u64 = 30 * 60;

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn profile_image_key(user_id: i64, ext: &str) -> String {
    format!("profile_images/{}/{}.{}", user_id, Uuid::new_v4(), ext)
}

/// Stores `upload` and points the user's `image` at it. The previous object
/// is removed afterwards; failing to remove it only logs.
pub async fn replace_profile_image(
    st: &AppState,
    user: &User,
    upload: ImageUpload,
    ext: &str,
) -> anyhow::Result<User> {
    let key = profile_image_key(user.id, ext);
    st.storage
        .put_object(&key, upload.body, &upload.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let updated = st
        .users
        .set_image(user.id, Some(&key))
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("store profile image key")?;

    if let Some(old) = user.image.as_deref().filter(|old| *old != key) {
        if let Err(e) = st.storage.delete_object(old).await {
            warn!(error = %e, key = old, "failed to delete previous profile image");
        }
    }

    info!(user_id = user.id, key = %key, "profile image updated");
    Ok(updated)
}

pub async fn presign_profile_image(st: &AppState, user: &User) -> anyhow::Result<Option<String>> {
    let Some(key) = user.image.as_deref() else {
        return Ok(None);
    };
    let url = st
        .storage
        .presign_get(key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for key {}", key))?;
    Ok(Some(url))
}
