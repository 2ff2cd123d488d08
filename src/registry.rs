//! 资源注册表
//!
//! 固定容量的槽位表：编号 → 弱引用的活动资源。
//!
//! - 槽位为空或资源已释放时，通过驱动构造新资源并只保存弱引用
//! - 槽位上有活动资源时，按值比较配置：相同则返回同一个实例，不同则报冲突
//! - 最后一个强引用释放时资源自行析构，槽位自然失效

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::{Error, Result};

/// 按编号索引的弱引用槽位表
pub struct HandleRegistry<R> {
    resource: &'static str,
    slots: Mutex<Vec<Weak<R>>>,
}

impl<R> HandleRegistry<R> {
    /// 创建容量为 `capacity` 的注册表
    ///
    /// `resource` 用于错误信息，例如 `"GPIO"`
    pub fn new(resource: &'static str, capacity: usize) -> Self {
        Self {
            resource,
            slots: Mutex::new((0..capacity).map(|_| Weak::new()).collect()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// 越界检查，不触碰任何槽位
    pub fn check(&self, key: usize) -> Result<()> {
        let capacity = self.capacity();
        if key >= capacity {
            return Err(Error::OutOfRange {
                resource: self.resource,
                index: key,
                capacity,
            });
        }
        Ok(())
    }

    /// 查询编号上的活动资源
    pub fn get(&self, key: usize) -> Option<Arc<R>> {
        self.lock().get(key).and_then(Weak::upgrade)
    }

    /// 当前仍然存活的资源数量
    pub fn live(&self) -> usize {
        self.lock().iter().filter(|slot| slot.strong_count() > 0).count()
    }

    /// 获取编号上的资源
    ///
    /// # 参数
    /// * `key` - 资源编号
    /// * `compatible` - 判断已有资源的配置是否与本次请求一致
    /// * `create` - 槽位为空时构造新资源
    ///
    /// # 返回
    /// * `Ok(Arc<R>)` - 已有的同一实例，或新构造的实例
    /// * `Err(Error::OutOfRange)` - 编号越界
    /// * `Err(Error::Conflict)` - 已有资源配置不同，原资源不受影响
    /// * `Err(..)` - `create` 返回的错误，槽位保持为空
    pub fn acquire<C, F>(&self, key: usize, compatible: C, create: F) -> Result<Arc<R>>
    where
        C: FnOnce(&R) -> bool,
        F: FnOnce() -> Result<R>,
    {
        self.check(key)?;

        let mut slots = self.lock();
        if let Some(live) = slots[key].upgrade() {
            if compatible(&live) {
                return Ok(live);
            }
            log::warn!("{} {} 已被占用且配置不同", self.resource, key);
            return Err(Error::Conflict {
                resource: self.resource,
                index: key,
            });
        }

        let resource = Arc::new(create()?);
        slots[key] = Arc::downgrade(&resource);
        log::debug!("{} {} 已创建", self.resource, key);
        Ok(resource)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Weak<R>>> {
        // 槽位里只有弱引用，中毒后的数据仍然一致
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverError, ErrorKind};

    #[derive(Debug, PartialEq)]
    struct Thing {
        config: u32,
    }

    #[test]
    fn test_acquire_returns_same_instance() {
        let registry = HandleRegistry::<Thing>::new("thing", 4);
        let a = registry.acquire(1, |t| t.config == 7, || Ok(Thing { config: 7 })).unwrap();
        let b = registry
            .acquire(1, |t| t.config == 7, || panic!("不应重新构造"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.live(), 1);
    }

    #[test]
    fn test_conflict_leaves_resource_untouched() {
        let registry = HandleRegistry::<Thing>::new("thing", 4);
        let a = registry.acquire(2, |_| true, || Ok(Thing { config: 1 })).unwrap();
        let err = registry
            .acquire(2, |t| t.config == 2, || Ok(Thing { config: 2 }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingState);
        assert_eq!(a.config, 1);
        assert!(Arc::ptr_eq(&a, &registry.get(2).unwrap()));
    }

    #[test]
    fn test_out_of_range_before_create() {
        let registry = HandleRegistry::<Thing>::new("thing", 2);
        let err = registry
            .acquire(2, |_| true, || panic!("越界时不应构造"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_failed_create_keeps_slot_empty() {
        let registry = HandleRegistry::<Thing>::new("thing", 2);
        let err = registry
            .acquire(0, |_| true, || {
                Err(Error::Driver { call: "create", source: DriverError::new(0x101) })
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DriverFailure);
        assert!(registry.get(0).is_none());
    }

    #[test]
    fn test_slot_reusable_after_release() {
        let registry = HandleRegistry::<Thing>::new("thing", 2);
        let a = registry.acquire(0, |_| true, || Ok(Thing { config: 1 })).unwrap();
        drop(a);
        assert!(registry.get(0).is_none());
        let b = registry.acquire(0, |t| t.config == 2, || Ok(Thing { config: 2 })).unwrap();
        assert_eq!(b.config, 2);
    }
}
