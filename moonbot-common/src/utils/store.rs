use std::{
    fmt::Debug,
    hash::Hash,
    sync::atomic::{AtomicBool, Ordering},
};

use dashmap::{mapref::multiple::RefMulti, DashMap};
use futures_util::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteError, WriteFailure},
    Database, IndexModel,
};
use serde::{Deserialize, Serialize};

/// A MongoDB collection fronted by a write-through in-memory cache.
///
/// Reads check the cache first and fall back to the database. Once `values`
/// has scanned the whole collection, the cache is complete and misses stop
/// going to the database. The unique index on `key` is what makes
/// `insert_if_not_exists` usable as an INSERT-OR-IGNORE primitive: a
/// duplicate-key write error (code 11000) is reported as `Ok(false)`, not
/// as a failure.
///
/// Assumes this process is the only writer of the collection.
pub struct PersistentCachedStore<
    K: Serialize + Clone + Send + Sync + Unpin + 'static + Eq + Hash,
    V: Serialize + Clone + Send + Sync + Unpin + 'static,
> {
    cache: DashMap<K, V>,
    collection: mongodb::Collection<StoredEntry<K, V>>,
    cached_all: AtomicBool,
}

impl<
        K: Serialize + Clone + Send + Sync + Unpin + 'static + Eq + Hash,
        V: Serialize + Clone + Send + Sync + Unpin + 'static,
    > Debug for PersistentCachedStore<K, V>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCachedStore")
            .field("cache", &self.cache.len())
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredEntry<
    K: Serialize + Clone + Send + Sync + Unpin + 'static + Eq + Hash,
    V: Serialize + Clone + Send + Sync + Unpin + 'static,
> {
    key: K,
    value: V,
}

impl<
        K: Serialize + Clone + Send + Sync + Unpin + 'static + Eq + Hash,
        V: Serialize + Clone + Send + Sync + Unpin + 'static,
    > PersistentCachedStore<K, V>
where
    StoredEntry<K, V>: Serialize + for<'de> Deserialize<'de>,
{
    pub async fn new(db: Database, name: &str) -> Result<Self, anyhow::Error> {
        let collection = db.collection(name);
        collection
            .create_index(
                IndexModel::builder()
                    .keys(bson::doc! { "key": 1 })
                    .options(
                        mongodb::options::IndexOptions::builder()
                            .unique(true)
                            .build(),
                    )
                    .build(),
            )
            .await?;
        Ok(Self {
            cache: DashMap::new(),
            collection,
            cached_all: AtomicBool::new(false),
        })
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        if let Some(value) = self.cache.get(key).as_deref() {
            return Some(value.clone());
        }
        if self.cached_all.load(Ordering::Relaxed) {
            return None;
        }
        match bson::to_bson(key) {
            Ok(key_bson) => {
                let value = self
                    .collection
                    .find_one(bson::doc! { "key": key_bson })
                    .await
                    .map_err(|err| log::error!("Error reading stored entry: {err:?}"))
                    .unwrap_or(None)
                    .map(|entry| entry.value);
                if let Some(value) = value.as_ref() {
                    self.cache.insert(key.clone(), value.clone());
                }
                value
            }
            Err(err) => {
                log::error!("Error serializing key: {err:?}");
                None
            }
        }
    }

    /// Returns true if the entry was inserted, false if the key already
    /// existed.
    pub async fn insert_if_not_exists(&self, key: K, value: V) -> Result<bool, anyhow::Error> {
        if self.cache.contains_key(&key) {
            return Ok(false);
        }
        if let Err(err) = self
            .collection
            .insert_one(StoredEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .await
        {
            if let ErrorKind::Write(WriteFailure::WriteError(WriteError { code: 11000, .. })) =
                &*err.kind
            {
                return Ok(false);
            }
            Err(err.into())
        } else {
            self.cache.insert(key, value);
            Ok(true)
        }
    }

    pub async fn insert_or_update(&self, key: K, value: V) -> Result<(), anyhow::Error> {
        self.cache.insert(key.clone(), value.clone());
        let key_bson = bson::to_bson(&key)?;
        let value_bson = bson::to_bson(&value)?;
        self.collection
            .update_one(
                bson::doc! { "key": key_bson },
                bson::doc! { "$set": bson::doc! { "value": value_bson } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &K) -> Result<Option<V>, anyhow::Error> {
        let removed = self.cache.remove(key);
        if self.cached_all.load(Ordering::Relaxed) && removed.is_none() {
            return Ok(None);
        }
        let key_bson = bson::to_bson(key)?;
        self.collection
            .delete_one(bson::doc! { "key": key_bson })
            .await?;
        Ok(removed.map(|(_, value)| value))
    }

    pub async fn values(&self) -> Result<impl Iterator<Item = RefMulti<K, V>>, anyhow::Error> {
        if !self.cached_all.load(Ordering::Relaxed) {
            let mut cursor = self.collection.find(bson::doc! {}).await?;
            while let Some(entry) = cursor.try_next().await? {
                self.cache.insert(entry.key, entry.value);
            }
            self.cached_all.store(true, Ordering::Relaxed);
        }
        Ok(self.cache.iter())
    }

    pub async fn contains_key(&self, key: &K) -> Result<bool, anyhow::Error> {
        if self.cache.contains_key(key) {
            return Ok(true);
        }
        if self.cached_all.load(Ordering::Relaxed) {
            return Ok(false);
        }
        Ok(self
            .collection
            .find_one(bson::doc! { "key": bson::to_bson(key)? })
            .await?
            .is_some())
    }

    pub async fn delete_many(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<(), anyhow::Error> {
        let keys: Vec<K> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys.iter() {
            self.cache.remove(key);
        }
        let keys_bson = keys
            .iter()
            .map(bson::to_bson)
            .collect::<Result<Vec<_>, _>>()?;
        self.collection
            .delete_many(bson::doc! { "key": { "$in": keys_bson } })
            .await?;
        Ok(())
    }
}
