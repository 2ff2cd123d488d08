//! 带代数的槽位分配器
//!
//! MCPWM 的 Operator / Comparator / Generator 由父节点强持有，调用方只拿到
//! [`ArenaKey`]。元素被移除后旧 key 的代数不再匹配，查找返回 `None`。

/// 元素的稳定标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaKey {
    index: usize,
    generation: u32,
}

impl ArenaKey {
    pub fn index(&self) -> usize {
        self.index
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> ArenaKey {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index];
            entry.value = Some(value);
            return ArenaKey {
                index,
                generation: entry.generation,
            };
        }
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        ArenaKey {
            index: self.entries.len() - 1,
            generation: 0,
        }
    }

    pub fn contains(&self, key: ArenaKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: ArenaKey) -> Option<&T> {
        self.entries
            .get(key.index)
            .filter(|entry| entry.generation == key.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, key: ArenaKey) -> Option<&mut T> {
        self.entries
            .get_mut(key.index)
            .filter(|entry| entry.generation == key.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// 移除元素，槽位代数加一，旧 key 随之失效
    pub fn remove(&mut self, key: ArenaKey) -> Option<T> {
        let entry = self.entries.get_mut(key.index)?;
        if entry.generation != key.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    /// 按插入槽位逆序清空，后创建的元素先析构
    pub fn clear(&mut self) {
        self.free.clear();
        for index in (0..self.entries.len()).rev() {
            let entry = &mut self.entries[index];
            if let Some(value) = entry.value.take() {
                entry.generation = entry.generation.wrapping_add(1);
                drop(value);
            }
            self.free.push(index);
        }
        self.len = 0;
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_key_after_slot_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let c = arena.insert(3);
        assert_eq!(a.index(), c.index());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(c), Some(&3));
    }

    #[test]
    fn test_clear_drops_in_reverse_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Noisy(u32, Rc<RefCell<Vec<u32>>>);
        impl Drop for Noisy {
            fn drop(&mut self) {
                self.1.borrow_mut().push(self.0);
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut arena = Arena::new();
        for i in 0..3 {
            arena.insert(Noisy(i, log.clone()));
        }
        arena.clear();
        assert_eq!(*log.borrow(), vec![2, 1, 0]);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_keys_stale_after_clear() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.clear();
        let b = arena.insert(2);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&2));
    }
}
