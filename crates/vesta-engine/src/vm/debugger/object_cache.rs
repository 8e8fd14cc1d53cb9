//! Handles for values shown to a debugger front-end

use parking_lot::Mutex;
use serde::Serialize;

use crate::vm::value::Value;

/// Handle of a cached value; valid for the whole debugger session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectId(pub u32);

/// Values handed out by id so a front-end can refer back to them
#[derive(Debug, Default)]
pub struct ObjectCache {
    objects: Mutex<Vec<Value>>,
}

impl ObjectCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `value`, adding it on first sight
    pub fn add(&self, value: Value) -> ObjectId {
        let mut objects = self.objects.lock();
        if let Some(index) = objects.iter().position(|v| v.identical(&value)) {
            return ObjectId(index as u32);
        }
        objects.push(value);
        ObjectId(objects.len() as u32 - 1)
    }

    /// Value behind `id`
    pub fn get(&self, id: ObjectId) -> Option<Value> {
        self.objects.lock().get(id.0 as usize).cloned()
    }

    /// Whether `id` was handed out by this cache
    pub fn is_valid(&self, id: ObjectId) -> bool {
        (id.0 as usize) < self.objects.lock().len()
    }

    /// Number of cached values
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Nothing cached
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_values_share_an_id() {
        let cache = ObjectCache::new();
        let list = Value::list(vec![Value::Int(1)]);
        let a = cache.add(list.clone());
        let b = cache.add(Value::Int(7));
        assert_eq!(cache.add(list), a);
        assert_ne!(a, b);
        assert!(cache.is_valid(b));
        assert!(!cache.is_valid(ObjectId(9)));
        assert_eq!(cache.get(b).and_then(|v| v.as_int()), Some(7));
        assert_eq!(cache.len(), 2);
    }
}
