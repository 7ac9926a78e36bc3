//! Filesystem layer: bucket/object paths, range reads, listing, and the
//! multipart upload state machine.
//!
//! All writes follow crash-only design: write to a temp sibling, fsync,
//! rename into place. Objects carry no sidecar metadata; the ETag is the
//! content MD5 computed on demand.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use md5::{Digest, Md5};
use rand::RngCore;

use crate::errors::{map_io_error, S3Error};
use crate::primitives::{format_iso8601, is_valid_bucket_name, is_valid_key};

const UPLOADS_DIR: &str = ".uploads";
const TMP_DIR: &str = ".tmp";

pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: i64,
    pub etag: String,
}

pub struct StoredObject {
    pub data: Bytes,
    pub meta: ObjectMeta,
}

pub struct BucketInfo {
    pub name: String,
    pub creation_date: i64,
}

pub struct ListResult {
    pub keys: Vec<(String, ObjectMeta)>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_key: Option<String>,
}

/// Root of the on-disk tree. One directory per bucket, plus the reserved
/// `.uploads/` subtree for in-progress multipart state.
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(UPLOADS_DIR))?;
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self { root })
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Resolve `bucket/key` to an absolute path, rejecting `..` and any
    /// absolute-path component. An absolute key would make `PathBuf::join`
    /// discard the bucket root entirely, so this must reject by component
    /// rather than by checking the joined result.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, S3Error> {
        for component in Path::new(key).components() {
            if matches!(
                component,
                std::path::Component::ParentDir
                    | std::path::Component::RootDir
                    | std::path::Component::Prefix(_)
            ) {
                return Err(S3Error::InvalidKey);
            }
        }
        Ok(self.bucket_path(bucket).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.root.join(TMP_DIR).join(format!("tmp-{}", hex::encode(bytes)))
    }

    fn write_atomic(&self, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.temp_path();
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, final_path)?;
        Ok(())
    }

    // ---- buckets ----------------------------------------------------

    pub fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        if !is_valid_bucket_name(bucket) {
            return Err(S3Error::InvalidBucketName);
        }
        std::fs::create_dir_all(self.bucket_path(bucket))
            .map_err(|e| S3Error::InternalError(e.into()))
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.bucket_path(bucket).is_dir()
    }

    pub fn delete_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let path = self.bucket_path(bucket);
        if !path.is_dir() {
            return Ok(());
        }
        let mut entries = std::fs::read_dir(&path).map_err(|e| S3Error::InternalError(e.into()))?;
        if entries.next().is_some() {
            return Err(S3Error::BucketNotEmpty);
        }
        std::fs::remove_dir(&path).map_err(|e| S3Error::InternalError(e.into()))
    }

    pub fn list_buckets(&self) -> Result<Vec<BucketInfo>, S3Error> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(|e| S3Error::InternalError(e.into()))? {
            let entry = entry.map_err(|e| S3Error::InternalError(e.into()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == UPLOADS_DIR || name == TMP_DIR {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| S3Error::InternalError(e.into()))?;
            if !metadata.is_dir() {
                continue;
            }
            let creation_date = mtime_secs(&metadata);
            out.push(BucketInfo { name, creation_date });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    // ---- objects ------------------------------------------------------

    pub fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, S3Error> {
        if !self.bucket_exists(bucket) {
            return Err(S3Error::NoSuchBucket);
        }
        if !is_valid_key(key) {
            return Err(S3Error::InvalidKey);
        }
        let path = self.object_path(bucket, key)?;
        let etag = md5_hex(&data);
        self.write_atomic(&path, &data)
            .map_err(|e| S3Error::InternalError(e.into()))?;
        Ok(etag)
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, S3Error> {
        if !self.bucket_exists(bucket) {
            return Err(S3Error::NoSuchBucket);
        }
        if !is_valid_key(key) {
            return Err(S3Error::InvalidKey);
        }
        let path = self.object_path(bucket, key)?;
        let data = std::fs::read(&path).map_err(|e| map_io_error(e, S3Error::NoSuchKey))?;
        let metadata = std::fs::metadata(&path).map_err(|e| S3Error::InternalError(e.into()))?;
        let meta = ObjectMeta {
            size: data.len() as u64,
            last_modified: mtime_secs(&metadata),
            etag: md5_hex(&data),
        };
        Ok(StoredObject { data: Bytes::from(data), meta })
    }

    pub fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, S3Error> {
        if !self.bucket_exists(bucket) {
            return Err(S3Error::NoSuchBucket);
        }
        if !is_valid_key(key) {
            return Err(S3Error::InvalidKey);
        }
        let path = self.object_path(bucket, key)?;
        let metadata = std::fs::metadata(&path).map_err(|e| map_io_error(e, S3Error::NoSuchKey))?;
        let file = std::fs::File::open(&path).map_err(|e| map_io_error(e, S3Error::NoSuchKey))?;
        let etag = md5_hex_streamed(file).map_err(|e| S3Error::InternalError(e.into()))?;
        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: mtime_secs(&metadata),
            etag,
        })
    }

    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        if !is_valid_key(key) {
            return Err(S3Error::InvalidKey);
        }
        let path = self.object_path(bucket, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(S3Error::InternalError(e.into())),
        }
    }

    // ---- listing --------------------------------------------------------

    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        continuation_key: Option<&str>,
    ) -> Result<ListResult, S3Error> {
        if !self.bucket_exists(bucket) {
            return Err(S3Error::NoSuchBucket);
        }
        let root = self.bucket_path(bucket);
        let mut all_keys = Vec::new();
        walk(&root, &root, &mut all_keys).map_err(|e| S3Error::InternalError(e.into()))?;
        all_keys.sort_by(|a, b| a.0.cmp(&b.0));

        // Filter to the candidate set first so the truncation check below can
        // peek at the next candidate without consuming it.
        let mut candidates = Vec::new();
        for (rel_key, metadata) in all_keys {
            if let Some(cont) = continuation_key {
                if rel_key.as_str() < cont {
                    continue;
                }
            }
            if !prefix.is_empty() && !rel_key.starts_with(prefix) {
                continue;
            }
            candidates.push((rel_key, metadata));
        }

        let mut keys = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut is_truncated = false;
        let mut next_continuation_key = None;
        let max_keys = max_keys.min(1000);

        let mut i = 0;
        while i < candidates.len() {
            let (rel_key, metadata) = &candidates[i];

            let emitted = if !delimiter.is_empty() {
                let search_from = prefix.len().min(rel_key.len());
                if let Some(idx) = rel_key[search_from..].find(delimiter) {
                    let end = search_from + idx + delimiter.len();
                    let cp = rel_key[..end].to_string();
                    if !common_prefixes.contains(&cp) {
                        common_prefixes.push(cp);
                        true
                    } else {
                        false
                    }
                } else {
                    keys.push((
                        rel_key.clone(),
                        ObjectMeta {
                            size: metadata.len(),
                            last_modified: mtime_secs(metadata),
                            etag: String::new(),
                        },
                    ));
                    true
                }
            } else {
                keys.push((
                    rel_key.clone(),
                    ObjectMeta {
                        size: metadata.len(),
                        last_modified: mtime_secs(metadata),
                        etag: String::new(),
                    },
                ));
                true
            };

            if emitted && keys.len() + common_prefixes.len() >= max_keys as usize {
                // Only truncated if a further, not-yet-emitted candidate
                // actually exists -- otherwise this page is the whole list.
                if let Some((next_key, _)) = candidates.get(i + 1) {
                    is_truncated = true;
                    next_continuation_key = Some(next_key.clone());
                }
                break;
            }
            i += 1;
        }

        common_prefixes.sort();

        // Fill in ETags only for the keys actually returned (avoids hashing
        // the whole bucket on every listing call).
        for (rel_key, meta) in keys.iter_mut() {
            let path = root.join(rel_key.as_str());
            if let Ok(data) = std::fs::read(&path) {
                meta.etag = md5_hex(&data);
            }
        }

        Ok(ListResult { keys, common_prefixes, is_truncated, next_continuation_key })
    }

    // ---- multipart --------------------------------------------------------

    pub fn initiate_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, S3Error> {
        if !self.bucket_exists(bucket) {
            return Err(S3Error::NoSuchBucket);
        }
        if !is_valid_key(key) {
            return Err(S3Error::InvalidKey);
        }
        let mut id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let upload_id = hex::encode(id_bytes);

        let upload_dir = self.upload_dir(&upload_id);
        std::fs::create_dir_all(&upload_dir).map_err(|e| S3Error::InternalError(e.into()))?;
        let meta_contents = format!("{}\n{}\n", bucket, key);
        std::fs::write(upload_dir.join(".meta"), meta_contents)
            .map_err(|e| S3Error::InternalError(e.into()))?;
        Ok(upload_id)
    }

    pub fn upload_part(&self, upload_id: &str, part_number: u32, data: Bytes) -> Result<String, S3Error> {
        let upload_dir = self.upload_dir(upload_id);
        if !upload_dir.is_dir() {
            return Err(S3Error::NoSuchUpload);
        }
        if !(1..=10_000).contains(&part_number) {
            return Err(S3Error::InvalidArgument("partNumber must be between 1 and 10000".into()));
        }
        let etag = md5_hex(&data);
        let final_path = upload_dir.join(part_number.to_string());
        self.write_atomic(&final_path, &data)
            .map_err(|e| S3Error::InternalError(e.into()))?;
        Ok(etag)
    }

    /// Assemble an upload's parts in filesystem order into the final object.
    /// The client's submitted part list is parsed for well-formedness by the
    /// caller but ignored here; this server trusts on-disk part numbering.
    pub fn complete_multipart_upload(&self, upload_id: &str) -> Result<(String, String, String), S3Error> {
        let upload_dir = self.upload_dir(upload_id);
        if !upload_dir.is_dir() {
            return Err(S3Error::NoSuchUpload);
        }
        let meta = std::fs::read_to_string(upload_dir.join(".meta"))
            .map_err(|e| S3Error::InternalError(e.into()))?;
        let mut lines = meta.lines();
        let bucket = lines.next().unwrap_or("").to_string();
        let key = lines.next().unwrap_or("").to_string();

        let mut part_numbers = Vec::new();
        for entry in std::fs::read_dir(&upload_dir).map_err(|e| S3Error::InternalError(e.into()))? {
            let entry = entry.map_err(|e| S3Error::InternalError(e.into()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(n) = name.parse::<u32>() {
                part_numbers.push(n);
            }
        }
        part_numbers.sort_unstable();

        let final_path = self.object_path(&bucket, &key)?;
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| S3Error::InternalError(e.into()))?;
        }
        let tmp_path = self.temp_path();

        let mut combined_md5 = Vec::new();
        {
            use std::io::Write;
            let mut out = std::fs::File::create(&tmp_path).map_err(|e| S3Error::InternalError(e.into()))?;
            for n in &part_numbers {
                let part_data = std::fs::read(upload_dir.join(n.to_string()))
                    .map_err(|e| S3Error::InternalError(e.into()))?;
                let mut hasher = Md5::new();
                hasher.update(&part_data);
                combined_md5.extend_from_slice(&hasher.finalize());
                out.write_all(&part_data).map_err(|e| S3Error::InternalError(e.into()))?;
            }
            out.sync_all().map_err(|e| S3Error::InternalError(e.into()))?;
        }
        std::fs::rename(&tmp_path, &final_path).map_err(|e| S3Error::InternalError(e.into()))?;
        std::fs::remove_dir_all(&upload_dir).map_err(|e| S3Error::InternalError(e.into()))?;

        let mut composite_hasher = Md5::new();
        composite_hasher.update(&combined_md5);
        let etag = format!("{}-{}", hex::encode(composite_hasher.finalize()), part_numbers.len());

        Ok((bucket, key, etag))
    }

    pub fn abort_multipart_upload(&self, upload_id: &str) -> Result<(), S3Error> {
        let upload_dir = self.upload_dir(upload_id);
        if !upload_dir.is_dir() {
            return Err(S3Error::NoSuchUpload);
        }
        std::fs::remove_dir_all(&upload_dir).map_err(|e| S3Error::InternalError(e.into()))
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(upload_id)
    }
}

impl ObjectMeta {
    pub fn last_modified_iso8601(&self) -> String {
        format_iso8601(self.last_modified)
    }
}

impl BucketInfo {
    pub fn creation_date_iso8601(&self) -> String {
        format_iso8601(self.creation_date)
    }
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file's contents in fixed-size chunks instead of buffering the
/// whole thing -- `HeadObject` needs the ETag but never the bytes.
fn md5_hex_streamed(mut file: std::fs::File) -> std::io::Result<String> {
    use std::io::Read;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Depth-first walk of `dir`, collecting `(relative_key, metadata)` pairs for
/// every regular file.
fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, std::fs::Metadata)>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            walk(root, &path, out)?;
        } else if metadata.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().into_owned();
            out.push((rel, metadata));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::new(dir.path()).expect("storage");
        (dir, storage)
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let etag = storage.put_object("b", "k", Bytes::from("hello")).unwrap();
        assert_eq!(etag, "5d41402abc4b2a76b9719d911017c592");
        let obj = storage.get_object("b", "k").unwrap();
        assert_eq!(obj.data, Bytes::from("hello"));
        assert_eq!(obj.meta.etag, etag);
    }

    #[test]
    fn put_missing_bucket_fails() {
        let (_dir, storage) = test_storage();
        let err = storage.put_object("no-such-bucket", "k", Bytes::from("x")).unwrap_err();
        assert!(matches!(err, S3Error::NoSuchBucket));
    }

    #[test]
    fn get_missing_key_is_no_such_key() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let err = storage.get_object("b", "nope").unwrap_err();
        assert!(matches!(err, S3Error::NoSuchKey));
    }

    #[test]
    fn get_missing_bucket_is_no_such_bucket() {
        let (_dir, storage) = test_storage();
        let err = storage.get_object("no-such-bucket", "k").unwrap_err();
        assert!(matches!(err, S3Error::NoSuchBucket));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        storage.put_object("b", "k", Bytes::from("x")).unwrap();
        storage.delete_object("b", "k").unwrap();
        storage.delete_object("b", "k").unwrap();
    }

    #[test]
    fn delete_bucket_rejects_nonempty() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        storage.put_object("b", "k", Bytes::from("x")).unwrap();
        let err = storage.delete_bucket("b").unwrap_err();
        assert!(matches!(err, S3Error::BucketNotEmpty));
    }

    #[test]
    fn list_objects_groups_common_prefixes() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        storage.put_object("b", "a/1", Bytes::from("x")).unwrap();
        storage.put_object("b", "a/2", Bytes::from("y")).unwrap();
        storage.put_object("b", "top", Bytes::from("z")).unwrap();

        let result = storage.list_objects("b", "", "/", 1000, None).unwrap();
        assert_eq!(result.common_prefixes, vec!["a/".to_string()]);
        assert_eq!(result.keys.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["top"]);
        assert!(!result.is_truncated);
    }

    #[test]
    fn list_objects_paginates() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        for i in 0..5 {
            storage.put_object("b", &format!("k{}", i), Bytes::from("x")).unwrap();
        }

        let keys_of = |r: &ListResult| r.keys.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>();

        let first = storage.list_objects("b", "", "", 2, None).unwrap();
        assert!(first.is_truncated);
        assert_eq!(keys_of(&first), vec!["k0", "k1"]);
        let cont = first.next_continuation_key.unwrap();
        assert_eq!(cont, "k2");

        let second = storage.list_objects("b", "", "", 2, Some(&cont)).unwrap();
        assert!(second.is_truncated);
        assert_eq!(keys_of(&second), vec!["k2", "k3"]);
        let cont = second.next_continuation_key.unwrap();
        assert_eq!(cont, "k4");

        let third = storage.list_objects("b", "", "", 2, Some(&cont)).unwrap();
        assert!(!third.is_truncated);
        assert_eq!(keys_of(&third), vec!["k4"]);
        assert!(third.next_continuation_key.is_none());
    }

    #[test]
    fn list_objects_not_truncated_when_max_keys_matches_remaining() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        storage.put_object("b", "k0", Bytes::from("x")).unwrap();
        storage.put_object("b", "k1", Bytes::from("x")).unwrap();

        let result = storage.list_objects("b", "", "", 2, None).unwrap();
        assert!(!result.is_truncated);
        assert!(result.next_continuation_key.is_none());
        assert_eq!(result.keys.len(), 2);
    }

    #[test]
    fn multipart_roundtrip() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let upload_id = storage.initiate_multipart_upload("b", "big").unwrap();
        assert_eq!(upload_id.len(), 32);
        storage.upload_part(&upload_id, 1, Bytes::from("aa")).unwrap();
        storage.upload_part(&upload_id, 2, Bytes::from("bb")).unwrap();
        let (bucket, key, etag) = storage.complete_multipart_upload(&upload_id).unwrap();
        assert_eq!(bucket, "b");
        assert_eq!(key, "big");
        assert!(etag.ends_with("-2"));

        let obj = storage.get_object("b", "big").unwrap();
        assert_eq!(obj.data, Bytes::from("aabb"));

        let err = storage.complete_multipart_upload(&upload_id).unwrap_err();
        assert!(matches!(err, S3Error::NoSuchUpload));
    }

    #[test]
    fn multipart_rejects_bad_part_number() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let upload_id = storage.initiate_multipart_upload("b", "big").unwrap();
        let err = storage.upload_part(&upload_id, 0, Bytes::from("x")).unwrap_err();
        assert!(matches!(err, S3Error::InvalidArgument(_)));
    }

    #[test]
    fn abort_removes_upload_dir() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let upload_id = storage.initiate_multipart_upload("b", "big").unwrap();
        storage.upload_part(&upload_id, 1, Bytes::from("x")).unwrap();
        storage.abort_multipart_upload(&upload_id).unwrap();
        let err = storage.upload_part(&upload_id, 2, Bytes::from("y")).unwrap_err();
        assert!(matches!(err, S3Error::NoSuchUpload));
    }

    #[test]
    fn path_traversal_is_rejected() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let err = storage.put_object("b", "../escape", Bytes::from("x")).unwrap_err();
        assert!(matches!(err, S3Error::InvalidKey));
    }

    #[test]
    fn absolute_key_is_rejected() {
        let (_dir, storage) = test_storage();
        storage.create_bucket("b").unwrap();
        let err = storage.put_object("b", "/etc/passwd", Bytes::from("x")).unwrap_err();
        assert!(matches!(err, S3Error::InvalidKey));
    }
}
