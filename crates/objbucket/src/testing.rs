//! Shared acceptance suite for [`Bucket`] implementations.
//!
//! Backends and decorator stacks run the same behavioral checks so that a
//! new implementation only has to wire itself into one test. The suite
//! panics on contract violations, matching how it is called from tests.

use bytes::Bytes;
use chrono::Utc;

use crate::bucket::{Bucket, DIR_DELIM};
use crate::error::{BucketError, Result};
use crate::options::{IterOption, IterOptionType, UploadOption, UploadOptionType};
use crate::stream::ObjectStream;

async fn content_of(bucket: &dyn Bucket, name: &str) -> Result<Vec<u8>> {
    bucket.get(name).await?.read_all().await
}

async fn list(bucket: &dyn Bucket, dir: &str, options: &[IterOption]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    bucket
        .iter(dir, &mut |name| {
            names.push(name.to_string());
            Ok(())
        }, options)
        .await?;
    Ok(names)
}

/// Exercise the full [`Bucket`] contract against `bucket`.
///
/// The bucket must start empty; the suite removes everything it uploads.
/// Panics on the first violated expectation.
pub async fn acceptance_test(bucket: &dyn Bucket) -> Result<()> {
    let started = Utc::now();

    // Missing objects.
    assert!(!bucket.exists("id1/obj_1").await?);
    assert!(bucket.get("id1/obj_1").await.unwrap_err().is_not_found());
    assert!(bucket.attributes("id1/obj_1").await.unwrap_err().is_not_found());
    assert!(bucket.delete("id1/obj_1").await.unwrap_err().is_not_found());

    // Upload and read back.
    bucket
        .upload(
            "id1/obj_1",
            ObjectStream::from_bytes(Bytes::from_static(b"@test-data@")),
            &[],
        )
        .await?;
    assert!(bucket.exists("id1/obj_1").await?);
    assert_eq!(content_of(bucket, "id1/obj_1").await?, b"@test-data@");

    // Ranged reads.
    let head = bucket.get_range("id1/obj_1", 0, Some(5)).await?;
    assert_eq!(head.read_all().await?, b"@test");
    let middle = bucket.get_range("id1/obj_1", 1, Some(4)).await?;
    assert_eq!(middle.read_all().await?, b"test");
    let tail = bucket.get_range("id1/obj_1", 1, None).await?;
    assert_eq!(tail.read_all().await?, b"test-data@");
    let clamped = bucket.get_range("id1/obj_1", 1, Some(3000)).await?;
    assert_eq!(clamped.read_all().await?, b"test-data@");
    let huge = bucket.get_range("id1/obj_1", 1, Some(u64::MAX)).await?;
    assert_eq!(huge.read_all().await?, b"test-data@");
    let past_end = bucket.get_range("id1/obj_1", 3000, Some(3000)).await?;
    assert!(past_end.read_all().await?.is_empty());
    let err = bucket.get_range("id1/obj_1", 0, Some(0)).await.unwrap_err();
    assert!(matches!(err, BucketError::InvalidArgument(_)));

    // Attributes.
    let attrs = bucket.attributes("id1/obj_1").await?;
    assert_eq!(attrs.size, 11);
    assert!(attrs.last_modified >= started - chrono::Duration::seconds(5));

    // Overwrite without preconditions.
    bucket
        .upload(
            "id1/obj_1",
            ObjectStream::from_bytes(Bytes::from_static(b"@test-data@")),
            &[],
        )
        .await?;

    // Conditional upload, where the backend supports it.
    if bucket
        .supported_upload_options()
        .contains(&UploadOptionType::IfNotExists)
    {
        let err = bucket
            .upload(
                "id1/obj_1",
                ObjectStream::from_bytes(Bytes::from_static(b"other")),
                &[UploadOption::if_not_exists()],
            )
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());
        assert_eq!(content_of(bucket, "id1/obj_1").await?, b"@test-data@");
    }

    // Listing.
    for (name, content) in [
        ("id1/obj_2", "@test-data2@"),
        ("id1/sub/obj_3", "@test-data3@"),
        ("id2/obj_4", "@test-data4@"),
        ("obj_5", "@test-data5@"),
    ] {
        bucket
            .upload(
                name,
                ObjectStream::from_bytes(Bytes::copy_from_slice(content.as_bytes())),
                &[],
            )
            .await?;
    }

    assert_eq!(list(bucket, "", &[]).await?, vec!["id1/", "id2/", "obj_5"]);
    assert_eq!(
        list(bucket, "", &[IterOption::recursive()]).await?,
        vec![
            "id1/obj_1",
            "id1/obj_2",
            "id1/sub/obj_3",
            "id2/obj_4",
            "obj_5",
        ],
    );
    // Trailing delimiter on the listed directory is optional.
    assert_eq!(
        list(bucket, "id1", &[]).await?,
        vec!["id1/obj_1", "id1/obj_2", "id1/sub/"],
    );
    assert_eq!(
        list(bucket, "id1/", &[]).await?,
        vec!["id1/obj_1", "id1/obj_2", "id1/sub/"],
    );
    assert!(list(bucket, "id_absent", &[]).await?.is_empty());

    // The visitor's error stops iteration and surfaces unchanged.
    let mut seen = 0usize;
    let err = bucket
        .iter("", &mut |_name| {
            seen += 1;
            Err(BucketError::Other("stop".to_string()))
        }, &[IterOption::recursive()])
        .await
        .unwrap_err();
    assert_eq!(seen, 1);
    assert!(err.to_string().contains("stop"));

    // Modification times are populated only on request.
    if bucket
        .supported_iter_options()
        .contains(&IterOptionType::UpdatedAt)
    {
        bucket
            .iter_with_attributes(
                "",
                &mut |attrs| {
                    assert!(
                        attrs.is_dir() || attrs.last_modified().is_some(),
                        "missing last_modified for {}",
                        attrs.name(),
                    );
                    Ok(())
                },
                &[IterOption::recursive(), IterOption::updated_at()],
            )
            .await?;

        bucket
            .iter_with_attributes(
                "",
                &mut |attrs| {
                    assert!(attrs.last_modified().is_none());
                    Ok(())
                },
                &[IterOption::recursive()],
            )
            .await?;
    }

    // Delete everything and verify the bucket reads as empty again.
    for name in list(bucket, "", &[IterOption::recursive()]).await? {
        assert!(!name.ends_with(DIR_DELIM));
        bucket.delete(&name).await?;
        assert!(!bucket.exists(&name).await?);
    }
    assert!(list(bucket, "", &[IterOption::recursive()]).await?.is_empty());

    Ok(())
}
