/*
 * SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stratus Contributors. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async mutexes. Allocation serializes per network and per guest,
/// never globally, so two guests on different networks don't contend.
///
/// The map only ever grows; entries are a bare `Arc<Mutex<()>>` and the key
/// population (networks, guests) is small enough that reaping is not worth
/// the locking it would take.
pub struct KeyedLocks<K> {
    inner: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        KeyedLocks {
            inner: DashMap::new(),
        }
    }

    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = self
            .inner
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
