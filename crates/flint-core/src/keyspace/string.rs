use super::*;

use bytes::Bytes;

/// Expiration option for SET, resolved to a deadline inside the shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpire {
    /// Relative TTL (EX / PX), measured from when the shard runs the write.
    After(Duration),
    /// Absolute unix timestamp in milliseconds (EXAT / PXAT).
    At(u64),
}

/// Write precondition for SET. One enum rather than two flags so NX and
/// XX can't both be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// NX: only write if the key is absent.
    IfAbsent,
    /// XX: only write if the key is present.
    IfPresent,
}

/// Options for [`Keyspace::set`]. `Default` is a plain overwrite that
/// clears any existing TTL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expire: Option<SetExpire>,
    /// Keep the existing key's deadline. Never combined with `expire`.
    pub keep_ttl: bool,
    pub condition: Option<SetCondition>,
    /// Report the pre-write value in [`SetOutcome::previous`].
    pub get: bool,
}

/// What a SET did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// False when the NX/XX precondition skipped the write.
    pub written: bool,
    /// The value before the write. Only populated when `get` was set.
    pub previous: Option<Value>,
}

impl Keyspace {
    /// Retrieves the value for `key`, or `None` if missing/expired.
    ///
    /// Expired keys are removed lazily on access. Successful reads update
    /// the entry's access metadata for LRU/LFU tracking.
    ///
    /// Uses a single hash probe on the common (non-expired) path.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        match self.entries.get_mut(key) {
            Some(e) if e.is_expired() => {}
            Some(e) => {
                e.touch();
                return Some(e.value.clone());
            }
            None => return None,
        }
        self.remove_if_expired(key);
        None
    }

    /// Reads `key` without counting as an access, so LRU/LFU ranking is
    /// left alone. Expired keys are still removed.
    pub fn peek(&mut self, key: &str) -> Option<Value> {
        if self.remove_if_expired(key) {
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Stores a key-value pair, honoring the NX/XX precondition, TTL
    /// options, KEEPTTL, and GET.
    ///
    /// The value is integer-encoded when its bytes are a canonical i64.
    /// An absolute deadline that has already elapsed still counts as a
    /// performed write, but leaves the key absent.
    ///
    /// Nothing is modified when the write is refused for memory.
    pub fn set(
        &mut self,
        key: String,
        value: Bytes,
        opts: SetOptions,
    ) -> Result<SetOutcome, WriteError> {
        self.remove_if_expired(&key);

        // single lookup: existence, size, expiry and (for GET) the value
        let old_info = self.entries.get(key.as_str()).map(|e| {
            let previous = opts.get.then(|| e.value.clone());
            (memory::entry_size(&key, &e.value), e.expires_at_ms, previous)
        });
        let key_exists = old_info.is_some();
        let (old_size, old_expiry, previous) = old_info.unwrap_or((0, time::NO_EXPIRY, None));

        let blocked = match opts.condition {
            Some(SetCondition::IfAbsent) => key_exists,
            Some(SetCondition::IfPresent) => !key_exists,
            None => false,
        };
        if blocked {
            return Ok(SetOutcome {
                written: false,
                previous,
            });
        }

        let expires_at_ms = match opts.expire {
            Some(SetExpire::After(ttl)) => time::deadline_after(ttl.as_millis() as u64),
            Some(SetExpire::At(unix_ms)) => time::absolute_deadline(unix_ms),
            None if opts.keep_ttl => old_expiry,
            None => time::NO_EXPIRY,
        };

        // a deadline in the past: the write lands and expires at once
        if time::is_expired(expires_at_ms) {
            if self.remove_entry(&key).is_some() {
                self.expired_total += 1;
            }
            return Ok(SetOutcome {
                written: true,
                previous,
            });
        }

        let new_value = Value::from_bytes(value);
        let new_size = memory::entry_size(&key, &new_value);
        let extra_keys = usize::from(!key_exists);
        if !self.admit_write(new_size.saturating_sub(old_size), extra_keys) {
            return Err(WriteError::OutOfMemory);
        }

        if let Some(old) = self.entries.get(key.as_str()) {
            self.memory.replace(&key, &old.value, &new_value);
        } else {
            self.memory.add(&key, &new_value);
        }
        self.adjust_expiry_count(
            key_exists && old_expiry != time::NO_EXPIRY,
            expires_at_ms != time::NO_EXPIRY,
        );

        self.entries
            .insert(key.into_boxed_str(), Entry::new(new_value, expires_at_ms));
        Ok(SetOutcome {
            written: true,
            previous,
        })
    }

    /// Increments the integer value of a key by 1.
    pub fn incr(&mut self, key: &str) -> Result<i64, IncrError> {
        self.incr_by(key, 1)
    }

    /// Decrements the integer value of a key by 1.
    pub fn decr(&mut self, key: &str) -> Result<i64, IncrError> {
        self.incr_by(key, -1)
    }

    /// Adds `delta` to the integer value of the key, creating it at zero
    /// if necessary. Used by INCR, DECR, INCRBY, and DECRBY.
    ///
    /// Only integer-encoded values qualify; a string value is a type
    /// mismatch even if it looks numeric. The key's TTL is preserved.
    pub fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64, IncrError> {
        self.remove_if_expired(key);

        if let Some(entry) = self.entries.get_mut(key) {
            let current = entry.value.as_integer().ok_or(IncrError::NotAnInteger)?;
            let new_val = current.checked_add(delta).ok_or(IncrError::Overflow)?;
            // integers live inline, so memory accounting doesn't change
            entry.value = Value::Integer(new_val);
            entry.touch();
            return Ok(new_val);
        }

        let new_value = Value::Integer(delta);
        if !self.admit_write(memory::entry_size(key, &new_value), 1) {
            return Err(IncrError::OutOfMemory);
        }
        self.memory.add(key, &new_value);
        self.entries
            .insert(Box::from(key), Entry::new(new_value, time::NO_EXPIRY));
        Ok(delta)
    }
}
