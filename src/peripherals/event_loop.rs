//! 事件循环
//!
//! 默认事件循环由板级对象懒创建并一直持有，从不删除。显式创建的事件循环在最后一个
//! 强引用释放时删除。注册处理函数得到一个 [`EventHandlerRegistration`]，释放它即注销。

use std::ffi::CStr;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::driver::{Driver, EventCallback, EventHandlerInstance, EventLoopHandle, LoopTarget};
use crate::error::{Error, Result};

/// 事件编号
pub type EventId = i32;

/// 匹配任意事件编号（`ESP_EVENT_ANY_ID`）
pub const ANY_ID: EventId = -1;

/// 事件基，按字符串内容比较
#[derive(Debug, Clone, Copy)]
pub struct EventBase(&'static CStr);

impl EventBase {
    pub const fn new(name: &'static CStr) -> Self {
        Self(name)
    }

    pub fn as_c_str(&self) -> &'static CStr {
        self.0
    }
}

impl PartialEq for EventBase {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bytes() == other.0.to_bytes()
    }
}

impl Eq for EventBase {}

impl Hash for EventBase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bytes().hash(state);
    }
}

/// 投递事件时的等待时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// 一直等待（`portMAX_DELAY`）
    Forever,
    /// 不等待
    None,
    Ticks(u32),
}

impl Wait {
    pub const fn ticks(&self) -> u32 {
        match self {
            Wait::Forever => u32::MAX,
            Wait::None => 0,
            Wait::Ticks(ticks) => *ticks,
        }
    }
}

/// 事件循环专属任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: &'static CStr,
    pub priority: u32,
    pub stack_size: u32,
    /// `None` 表示不绑定核心
    pub core_id: Option<i32>,
}

impl TaskInfo {
    /// `CONFIG_ESP_SYSTEM_EVENT_TASK_STACK_SIZE` 的默认值
    pub const DEFAULT_STACK_SIZE: u32 = 2304;

    pub const fn new(name: &'static CStr) -> Self {
        Self {
            name,
            priority: 0,
            stack_size: Self::DEFAULT_STACK_SIZE,
            core_id: None,
        }
    }
}

/// 显式事件循环配置，`task` 为 `None` 时需要调用方自行 [`EventLoop::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLoopConfig {
    pub queue_size: i32,
    pub task: Option<TaskInfo>,
}

/// 事件循环
pub struct EventLoop<D: Driver> {
    driver: Arc<D>,
    target: LoopTarget,
}

impl<D: Driver> EventLoop<D> {
    pub(crate) fn default_loop(driver: Arc<D>) -> Result<Self> {
        driver_try!(driver.event_loop_create_default(), "esp_event_loop_create_default");
        log::info!("默认事件循环已创建");
        Ok(Self {
            driver,
            target: LoopTarget::Default,
        })
    }

    pub(crate) fn create(driver: Arc<D>, config: &EventLoopConfig) -> Result<Self> {
        if config.queue_size <= 0 {
            return Err(Error::InvalidArgument("事件队列长度必须大于 0"));
        }
        let handle = driver_try!(driver.event_loop_create(config), "esp_event_loop_create");
        Ok(Self {
            driver,
            target: LoopTarget::Handle(handle),
        })
    }

    pub fn is_default(&self) -> bool {
        self.target == LoopTarget::Default
    }

    /// 显式事件循环的句柄，默认循环返回 `None`
    pub fn handle(&self) -> Option<EventLoopHandle> {
        match self.target {
            LoopTarget::Default => None,
            LoopTarget::Handle(handle) => Some(handle),
        }
    }

    /// 在调用方任务中分发事件，最多运行 `ticks_to_run` 个 tick
    ///
    /// 默认事件循环由系统任务驱动，调用返回 [`Error::InvalidState`]
    pub fn run(&self, ticks_to_run: u32) -> Result<()> {
        let handle = match self.target {
            LoopTarget::Default => {
                log::error!("run can not be used on the default event loop");
                return Err(Error::InvalidState("默认事件循环不能手动运行"));
            }
            LoopTarget::Handle(handle) => handle,
        };
        driver_try!(self.driver.event_loop_run(handle, ticks_to_run), "esp_event_loop_run");
        Ok(())
    }

    /// 注册事件处理函数
    ///
    /// # 参数
    /// * `base` - 事件基
    /// * `id` - 事件编号，[`ANY_ID`] 匹配全部
    /// * `handler` - 处理函数，参数为事件基、事件编号和事件数据
    ///
    /// # 返回
    /// * `Ok(EventHandlerRegistration)` - 释放即注销
    pub fn register_handler<F>(self: &Arc<Self>, base: EventBase, id: EventId, handler: F) -> Result<EventHandlerRegistration<D>>
    where
        F: Fn(EventBase, EventId, &[u8]) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(handler);
        let instance = driver_try!(
            self.driver.event_handler_register(self.target, base, id, callback),
            "esp_event_handler_instance_register"
        );
        Ok(EventHandlerRegistration {
            event_loop: Arc::downgrade(self),
            base,
            id,
            instance,
        })
    }

    pub fn post_event(&self, base: EventBase, id: EventId, data: &[u8], wait: Wait) -> Result<()> {
        driver_try!(
            self.driver.event_post(self.target, base, id, data, wait.ticks()),
            "esp_event_post"
        );
        Ok(())
    }

    /// 中断上下文投递，返回是否唤醒了更高优先级的任务
    pub fn post_event_from_isr(&self, base: EventBase, id: EventId, data: &[u8]) -> Result<bool> {
        Ok(driver_try!(
            self.driver.event_isr_post(self.target, base, id, data),
            "esp_event_isr_post"
        ))
    }
}

impl<D: Driver> Drop for EventLoop<D> {
    fn drop(&mut self) {
        if let LoopTarget::Handle(handle) = self.target {
            teardown!(self.driver.event_loop_delete(handle), "esp_event_loop_delete");
        }
    }
}

/// 事件处理函数注册凭据
///
/// 释放时从注册它的事件循环注销；事件循环已经不存在时什么也不做
pub struct EventHandlerRegistration<D: Driver> {
    event_loop: Weak<EventLoop<D>>,
    base: EventBase,
    id: EventId,
    instance: EventHandlerInstance,
}

impl<D: Driver> EventHandlerRegistration<D> {
    pub fn base(&self) -> EventBase {
        self.base
    }

    pub fn id(&self) -> EventId {
        self.id
    }
}

impl<D: Driver> Drop for EventHandlerRegistration<D> {
    fn drop(&mut self) {
        let Some(event_loop) = self.event_loop.upgrade() else {
            return;
        };
        teardown!(
            event_loop
                .driver
                .event_handler_unregister(event_loop.target, self.base, self.id, self.instance),
            "esp_event_handler_instance_unregister"
        );
    }
}

impl<D: Driver> std::fmt::Debug for EventLoop<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop").field("target", &self.target).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: EventBase = EventBase::new(c"TEST_EVENTS");

    fn queued_loop(driver: &Arc<MockDriver>) -> Arc<EventLoop<MockDriver>> {
        let config = EventLoopConfig {
            queue_size: 8,
            task: None,
        };
        Arc::new(EventLoop::create(driver.clone(), &config).unwrap())
    }

    #[test]
    fn test_event_base_compares_by_content() {
        let name = std::ffi::CString::new("TEST_EVENTS").unwrap();
        let leaked: &'static CStr = Box::leak(name.into_boxed_c_str());
        assert_eq!(EventBase::new(leaked), BASE);
        assert_ne!(EventBase::new(c"OTHER"), BASE);
    }

    #[test]
    fn test_wait_ticks() {
        assert_eq!(Wait::Forever.ticks(), u32::MAX);
        assert_eq!(Wait::None.ticks(), 0);
        assert_eq!(Wait::Ticks(10).ticks(), 10);
    }

    #[test]
    fn test_queued_loop_dispatches_on_run() {
        let driver = Arc::new(MockDriver::new());
        let event_loop = queued_loop(&driver);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _registration = event_loop
            .register_handler(BASE, ANY_ID, move |_, _, data| {
                assert_eq!(data, b"abc");
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        event_loop.post_event(BASE, 3, b"abc", Wait::None).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        event_loop.run(10).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_queue_size() {
        let driver = Arc::new(MockDriver::new());
        let config = EventLoopConfig {
            queue_size: 0,
            task: None,
        };
        let err = EventLoop::create(driver.clone(), &config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(driver.calls("event_loop_create"), 0);
    }

    #[test]
    fn test_registration_outliving_loop_is_noop() {
        let driver = Arc::new(MockDriver::new());
        let event_loop = queued_loop(&driver);
        let registration = event_loop.register_handler(BASE, 1, |_, _, _| {}).unwrap();
        drop(event_loop);
        assert_eq!(driver.calls("event_loop_delete"), 1);
        drop(registration);
        assert_eq!(driver.calls("event_handler_unregister"), 0);
    }

    #[test]
    fn test_isr_post_routes_to_handle() {
        let driver = Arc::new(MockDriver::new());
        let event_loop = queued_loop(&driver);
        assert!(!event_loop.post_event_from_isr(BASE, 1, &[]).unwrap());
        assert_eq!(driver.calls("event_isr_post"), 1);
    }
}
