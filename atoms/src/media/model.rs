use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Lifetime of every presigned read URL handed out.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

const PREVIEW_SHARDS: u32 = 1000;

/// Body of `POST /preview`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    #[serde(alias = "dicomS3Key")]
    pub dicom_key: String,
    pub study_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub preview_url: String,
}

/// Output key of an annotated copy: `annotated/{userId}/{epochMillis}.jpg`
pub fn annotated_key(user_id: &str, epoch_millis: i64) -> String {
    format!("annotated/{}/{}.jpg", user_id, epoch_millis)
}

/// Output key of a DICOM preview: `previews/{shard}/{studyId}/{epochMillis}.jpg`
pub fn preview_key(study_id: &str, epoch_millis: i64) -> String {
    format!(
        "previews/{}/{}/{}.jpg",
        preview_shard(study_id),
        study_id,
        epoch_millis
    )
}

/// Spreads preview writes over key prefixes. Hex ids (ObjectId style) use their
/// leading 8 hex digits; anything else falls back to a digest.
pub fn preview_shard(study_id: &str) -> u32 {
    let leading = study_id.get(..8).and_then(|p| u32::from_str_radix(p, 16).ok());
    let value = leading.unwrap_or_else(|| {
        let digest = Sha256::digest(study_id.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    });
    value % PREVIEW_SHARDS
}

/// Derive the object key a locator points at.
///
/// Plain keys pass through. For URLs the percent-decoded path is used, minus a
/// leading bucket segment when the URL is path-style.
pub fn key_from_locator(locator: &str, bucket: &str) -> Option<String> {
    if !(locator.starts_with("http://") || locator.starts_with("https://")) {
        let key = locator.trim_start_matches('/');
        return (!key.is_empty()).then(|| key.to_string());
    }

    let parsed = url::Url::parse(locator).ok()?;
    let path = parsed.path().trim_start_matches('/');
    let decoded = urlencoding::decode(path).ok()?.into_owned();

    let key = match decoded.split_once('/') {
        Some((first, rest)) if first == bucket && !rest.is_empty() => rest.to_string(),
        _ => decoded,
    };

    (!key.is_empty()).then_some(key)
}

/// Millisecond clock that never hands out the same value twice in a process,
/// so keys derived from it cannot collide.
#[derive(Debug, Default)]
pub struct MonotonicMillis {
    last: AtomicI64,
}

impl MonotonicMillis {
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    pub fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_style_url_strips_bucket() {
        let key = key_from_locator(
            "https://s3.us-east-1.amazonaws.com/aether-previews/previews/12/abc/1700000000000.jpg?X-Amz-Expires=3600",
            "aether-previews",
        );
        assert_eq!(key.as_deref(), Some("previews/12/abc/1700000000000.jpg"));
    }

    #[test]
    fn virtual_hosted_url_keeps_whole_path() {
        let key = key_from_locator(
            "https://aether-previews.s3.amazonaws.com/annotated/user%201/17.jpg?X-Amz-Signature=abc",
            "aether-previews",
        );
        assert_eq!(key.as_deref(), Some("annotated/user 1/17.jpg"));
    }

    #[test]
    fn plain_keys_pass_through() {
        assert_eq!(
            key_from_locator("previews/3/s1/1.jpg", "bucket").as_deref(),
            Some("previews/3/s1/1.jpg")
        );
        assert_eq!(key_from_locator("", "bucket"), None);
        assert_eq!(key_from_locator("https://bucket.s3.amazonaws.com/", "bucket"), None);
    }

    #[test]
    fn hex_study_ids_shard_on_leading_digits() {
        // 0x64b7f0c2 = 1689776322
        assert_eq!(preview_shard("64b7f0c2a1b2c3d4e5f60718"), 1689776322 % 1000);
        assert_eq!(
            preview_key("64b7f0c2a1b2c3d4e5f60718", 42),
            "previews/322/64b7f0c2a1b2c3d4e5f60718/42.jpg"
        );
    }

    #[test]
    fn opaque_study_ids_still_shard_in_range() {
        let shard = preview_shard("study-without-hex");
        assert!(shard < 1000);
        assert_eq!(shard, preview_shard("study-without-hex"));
    }

    #[test]
    fn monotonic_clock_never_repeats() {
        let clock = MonotonicMillis::new();
        let a = clock.next();
        let b = clock.next();
        let c = clock.next();
        assert!(a < b && b < c);
        assert_eq!(annotated_key("u1", b), format!("annotated/u1/{}.jpg", b));
    }
}
