//! The disk-resident extendible hash table.
//!
//! Three-level routing: the header page picks a directory by the hash's top
//! bits, the directory picks a bucket by its low `global_depth` bits, and
//! the bucket is scanned linearly. Buckets split (doubling the directory
//! when needed) on overflow and merge with their split image when emptied.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer_pool::BufferPoolManager;
use crate::hash_pages::{
    HashBucketPage, HashBucketPageMut, HashDirectoryPageMut, HashHeaderPage, HashHeaderPageMut,
};
use crate::{AccessType, PageId, StorageError, INVALID_PAGE_ID};

/// Maps a key to the 32-bit hash the directory structure routes on.
pub trait KeyHasher<K>: Default {
    fn hash_key(&self, key: &K) -> u32;
}

#[derive(Default)]
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

pub struct DiskExtendibleHashTable<K, V, H = DefaultKeyHasher> {
    bpm: Arc<BufferPoolManager>,
    hasher: H,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> DiskExtendibleHashTable<K, V, H>
where
    K: Copy + PartialEq,
    V: Copy,
    H: KeyHasher<K>,
{
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> Result<Self, StorageError> {
        let guard = bpm.new_page()?;
        let header_page_id = guard.page_id();
        HashHeaderPageMut::new(&mut guard.write()).init(header_max_depth);
        drop(guard);
        Ok(Self {
            bpm,
            hasher: H::default(),
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        let hash = self.hasher.hash_key(key);
        let directory_page_id = {
            let guard = self
                .bpm
                .fetch_page_read(self.header_page_id, AccessType::Index)?;
            let header = HashHeaderPage::new(guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let bucket_page_id = {
            let guard = self
                .bpm
                .fetch_page_read(directory_page_id, AccessType::Index)?;
            let directory = crate::hash_pages::HashDirectoryPage::new(guard.data());
            directory.bucket_page_id(directory.hash_to_bucket_index(hash))
        };
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let guard = self.bpm.fetch_page_read(bucket_page_id, AccessType::Index)?;
        Ok(HashBucketPage::<K, V>::new(guard.data()).lookup(key))
    }

    /// Inserts a new key. Fails with `HashKeyExists` on a duplicate and
    /// `HashDepthExhausted` when splitting can no longer separate the
    /// bucket's keys.
    pub fn insert(&self, key: K, value: V) -> Result<(), StorageError> {
        let hash = self.hasher.hash_key(&key);

        let directory_index;
        let mut directory_page_id;
        {
            let guard = self
                .bpm
                .fetch_page_read(self.header_page_id, AccessType::Index)?;
            let header = HashHeaderPage::new(guard.data());
            directory_index = header.hash_to_directory_index(hash);
            directory_page_id = header.directory_page_id(directory_index);
        }

        if directory_page_id == INVALID_PAGE_ID {
            // First key routed here: materialize the directory and its
            // single bucket under the header's exclusive latch.
            let mut header_guard = self
                .bpm
                .fetch_page_write(self.header_page_id, AccessType::Index)?;
            let existing =
                HashHeaderPageMut::new(header_guard.data_mut()).directory_page_id(directory_index);
            if existing == INVALID_PAGE_ID {
                let directory_guard = self.bpm.new_page()?;
                let bucket_guard = self.bpm.new_page()?;
                directory_page_id = directory_guard.page_id();
                let bucket_page_id = bucket_guard.page_id();

                HashBucketPageMut::<K, V>::new(&mut bucket_guard.write())
                    .init(self.bucket_max_size);
                {
                    let mut dir_data = directory_guard.write();
                    let mut directory = HashDirectoryPageMut::new(&mut dir_data);
                    directory.init(self.directory_max_depth);
                    directory.set_bucket_page_id(0, bucket_page_id);
                    directory.set_local_depth(0, 0);
                }
                HashHeaderPageMut::new(header_guard.data_mut())
                    .set_directory_page_id(directory_index, directory_page_id);
                crate::quarry_debug_log!(
                    "[HashTable::insert] created directory {directory_page_id} with bucket {bucket_page_id}"
                );
            } else {
                directory_page_id = existing;
            }
        }

        let mut directory_guard = self
            .bpm
            .fetch_page_write(directory_page_id, AccessType::Index)?;

        loop {
            let mut directory = HashDirectoryPageMut::new(directory_guard.data_mut());
            let bucket_index = directory.hash_to_bucket_index(hash);
            let bucket_page_id = directory.bucket_page_id(bucket_index);

            let mut bucket_guard = self.bpm.fetch_page_write(bucket_page_id, AccessType::Index)?;
            let mut bucket = HashBucketPageMut::<K, V>::new(bucket_guard.data_mut());
            if bucket.lookup(&key).is_some() {
                return Err(StorageError::HashKeyExists);
            }
            if !bucket.is_full() {
                bucket.insert(key, value);
                return Ok(());
            }

            // Split. Deepen the directory first when the bucket already
            // uses every routed bit.
            let local_depth = directory.local_depth(bucket_index);
            if local_depth == directory.global_depth() {
                if directory.global_depth() == directory.max_depth() {
                    return Err(StorageError::HashDepthExhausted);
                }
                directory.incr_global_depth();
            }
            let new_local_depth = local_depth + 1;

            let image_guard = self.bpm.new_page()?;
            let image_page_id = image_guard.page_id();
            let mut image_data = image_guard.write();
            let mut image = HashBucketPageMut::<K, V>::new(&mut image_data);
            image.init(self.bucket_max_size);

            // Repoint half the slots sharing the old bucket and bump local
            // depths on both sides.
            let anchor_bit = (bucket_index >> (new_local_depth - 1)) & 1;
            for i in 0..directory.size() {
                if directory.bucket_page_id(i) == bucket_page_id {
                    if (i >> (new_local_depth - 1)) & 1 != anchor_bit {
                        directory.set_bucket_page_id(i, image_page_id);
                    }
                    directory.set_local_depth(i, new_local_depth);
                }
            }

            // Only tuples whose fresh bit selects the image move.
            let entries = bucket.entries();
            let mut kept = Vec::with_capacity(entries.len());
            for (entry_key, entry_value) in entries {
                let entry_index =
                    directory.hash_to_bucket_index(self.hasher.hash_key(&entry_key));
                if directory.bucket_page_id(entry_index) == image_page_id {
                    image.insert(entry_key, entry_value);
                } else {
                    kept.push((entry_key, entry_value));
                }
            }
            bucket.replace_all(&kept);
            crate::quarry_debug_log!(
                "[HashTable::insert] split bucket {bucket_page_id}, image {image_page_id}, depth {new_local_depth}"
            );
            // Retry: the loop re-routes the key against the updated directory.
        }
    }

    /// Removes a key, merging emptied buckets with their split images and
    /// shrinking the directory when every bucket allows it.
    pub fn remove(&self, key: &K) -> Result<bool, StorageError> {
        let hash = self.hasher.hash_key(key);
        let directory_page_id = {
            let guard = self
                .bpm
                .fetch_page_read(self.header_page_id, AccessType::Index)?;
            let header = HashHeaderPage::new(guard.data());
            header.directory_page_id(header.hash_to_directory_index(hash))
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut directory_guard = self
            .bpm
            .fetch_page_write(directory_page_id, AccessType::Index)?;
        let mut directory = HashDirectoryPageMut::new(directory_guard.data_mut());
        let bucket_index = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_index);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let removed = {
            let mut bucket_guard =
                self.bpm.fetch_page_write(bucket_page_id, AccessType::Index)?;
            HashBucketPageMut::<K, V>::new(bucket_guard.data_mut()).remove(key)
        };
        if !removed {
            return Ok(false);
        }

        // Merge chain: an emptied bucket folds into its split image, which
        // may itself now be empty at the shallower depth.
        let mut check_index = bucket_index;
        loop {
            let local_depth = directory.local_depth(check_index);
            if local_depth == 0 {
                break;
            }
            let check_page_id = directory.bucket_page_id(check_index);
            let empty = {
                let guard = self.bpm.fetch_page_read(check_page_id, AccessType::Index)?;
                HashBucketPage::<K, V>::new(guard.data()).is_empty()
            };
            if !empty {
                break;
            }

            let image_index = directory.get_split_image_index(check_index);
            if directory.local_depth(image_index) != local_depth {
                break;
            }
            let image_page_id = directory.bucket_page_id(image_index);
            if image_page_id == check_page_id {
                break;
            }

            for i in 0..directory.size() {
                if directory.bucket_page_id(i) == check_page_id {
                    directory.set_bucket_page_id(i, image_page_id);
                }
            }
            for i in 0..directory.size() {
                if directory.bucket_page_id(i) == image_page_id {
                    directory.set_local_depth(i, local_depth - 1);
                }
            }
            self.bpm.delete_page(check_page_id)?;
            crate::quarry_debug_log!(
                "[HashTable::remove] merged bucket {check_page_id} into {image_page_id}"
            );
            check_index = image_index;
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
        }
        Ok(true)
    }

    /// Walks every directory reachable from the header and panics on any
    /// violated structural invariant. Test hook.
    pub fn verify_integrity(&self) -> Result<(), StorageError> {
        let header_guard = self
            .bpm
            .fetch_page_read(self.header_page_id, AccessType::Index)?;
        let header = HashHeaderPage::new(header_guard.data());
        for i in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(i);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }
            let guard = self
                .bpm
                .fetch_page_read(directory_page_id, AccessType::Index)?;
            crate::hash_pages::HashDirectoryPage::new(guard.data()).verify_integrity();
        }
        Ok(())
    }
}
