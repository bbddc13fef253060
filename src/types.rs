use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{error::DbError, utils::HandyRwLock};

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, DbError>;
pub type DbResult = Result<(), DbError>;

pub struct ConcurrentHashMap<K, V> {
    map: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            map: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        K: std::cmp::Eq + std::hash::Hash,
        V: Clone,
    {
        self.map.rl().get(key).cloned()
    }

    pub fn get_or_insert(
        &self,
        key: &K,
        value_gen_fn: impl Fn(&K) -> Result<V, DbError>,
    ) -> Result<V, DbError>
    where
        K: std::cmp::Eq + std::hash::Hash + Clone,
        V: Clone,
    {
        let mut buffer = self.map.wl();
        match buffer.get(key) {
            Some(v) => Ok(v.clone()),
            None => {
                let v = value_gen_fn(key)?;
                buffer.insert(key.clone(), v.clone());
                Ok(v)
            }
        }
    }

    pub fn alter_value(
        &self,
        key: &K,
        alter_fn: impl Fn(&mut V) -> Result<(), DbError>,
    ) -> Result<(), DbError>
    where
        K: std::cmp::Eq + std::hash::Hash + Clone,
        V: Clone + std::default::Default,
    {
        let mut map = self.map.wl();

        if let Some(v) = map.get_mut(key) {
            alter_fn(v)
        } else {
            let mut new_v = Default::default();
            alter_fn(&mut new_v)?;
            map.insert(key.clone(), new_v);
            Ok(())
        }
    }

    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.map.rl().keys().cloned().collect()
    }

    pub fn remove(&self, key: &K) -> Option<V>
    where
        K: std::cmp::Eq + std::hash::Hash,
    {
        self.map.wl().remove(key)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V>
    where
        K: std::cmp::Eq + std::hash::Hash,
    {
        self.map.wl().insert(key, value)
    }
}
