//! 事件跳板共用的部件
//!
//! IDF 的事件处理函数只拿到数据指针而没有长度，所以经由本 crate 投递的数据都带一个长度头：
//! 4 字节小端 `u32` 长度，后面紧跟数据本身。跳板只对登记过的事件基按这个格式解码，
//! 其它组件直接投递的事件（例如 Wi-Fi 事件）交给处理函数的是空切片。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EventHandlerInstance, EventLoopHandle, LoopTarget};

/// 长度头的字节数
pub const HEADER_LEN: usize = 4;

/// 中断上下文投递时数据的最大长度，帧放在栈上
pub const ISR_PAYLOAD_MAX: usize = 4;

/// 给数据加上长度头
pub fn encode(data: &[u8]) -> Option<Vec<u8>> {
    let len = u32::try_from(data.len()).ok()?;
    let mut frame = Vec::with_capacity(HEADER_LEN + data.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(data);
    Some(frame)
}

/// 不分配内存地编码到 `buf`，返回帧所占的部分；放不下时返回 `None`
pub fn encode_into<'a>(data: &[u8], buf: &'a mut [u8]) -> Option<&'a [u8]> {
    let total = HEADER_LEN.checked_add(data.len())?;
    if total > buf.len() {
        return None;
    }
    let len = u32::try_from(data.len()).ok()?;
    buf[..HEADER_LEN].copy_from_slice(&len.to_le_bytes());
    buf[HEADER_LEN..total].copy_from_slice(data);
    Some(&buf[..total])
}

/// 从完整的帧中取出数据，长度头与帧长不符时返回 `None`
pub fn decode(frame: &[u8]) -> Option<&[u8]> {
    let header: [u8; HEADER_LEN] = frame.get(..HEADER_LEN)?.try_into().ok()?;
    let len = usize::try_from(u32::from_le_bytes(header)).ok()?;
    frame.get(HEADER_LEN..HEADER_LEN.checked_add(len)?)
}

/// 从 IDF 交给处理函数的数据指针解码
///
/// # Safety
/// `ptr` 必须指向一份由 [`encode`] 或 [`encode_into`] 生成的完整帧，且在返回的切片使用期间有效
pub unsafe fn decode_raw<'a>(ptr: *const u8) -> &'a [u8] {
    let header = std::ptr::read_unaligned(ptr as *const [u8; HEADER_LEN]);
    let len = u32::from_le_bytes(header) as usize;
    std::slice::from_raw_parts(ptr.add(HEADER_LEN), len)
}

/// 经由本 crate 投递过的事件基，按 IDF 比较事件基的方式以指针记录
///
/// 只用原子操作，中断上下文里也能登记
pub struct FramedBases {
    slots: [AtomicUsize; FRAMED_BASES],
}

const FRAMED_BASES: usize = 32;

impl FramedBases {
    pub const CAPACITY: usize = FRAMED_BASES;

    pub const fn new() -> Self {
        const EMPTY: AtomicUsize = AtomicUsize::new(0);
        Self {
            slots: [EMPTY; FRAMED_BASES],
        }
    }

    /// 登记事件基，表满时返回 `false`
    pub fn mark(&self, base: *const u8) -> bool {
        let key = base as usize;
        if key == 0 {
            return false;
        }
        for slot in &self.slots {
            match slot.compare_exchange(0, key, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(current) if current == key => return true,
                Err(_) => continue,
            }
        }
        false
    }

    pub fn contains(&self, base: *const u8) -> bool {
        let key = base as usize;
        key != 0 && self.slots.iter().any(|slot| slot.load(Ordering::Acquire) == key)
    }
}

impl Default for FramedBases {
    fn default() -> Self {
        Self::new()
    }
}

/// 按注册实例保存处理函数上下文，并记住它注册在哪个事件循环上
///
/// 事件循环删除时 IDF 一并释放了上面的注册，对应的上下文通过 [`purge_loop`](Self::purge_loop) 丢弃
pub struct HandlerContexts<C> {
    entries: HashMap<EventHandlerInstance, (LoopTarget, C)>,
}

impl<C> HandlerContexts<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, instance: EventHandlerInstance, target: LoopTarget, context: C) {
        self.entries.insert(instance, (target, context));
    }

    pub fn remove(&mut self, instance: EventHandlerInstance) -> Option<C> {
        self.entries.remove(&instance).map(|(_, context)| context)
    }

    /// 丢弃注册在 `handle` 上的全部上下文，返回丢弃的数量
    pub fn purge_loop(&mut self, handle: EventLoopHandle) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, (target, _)| *target != LoopTarget::Handle(handle));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for HandlerContexts<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_carries_its_own_length() {
        let short = encode(&[1, 2, 3, 4]).unwrap();
        let long = encode(&[7u8; 100]).unwrap();
        assert_eq!(short.len(), HEADER_LEN + 4);
        assert_eq!(decode(&short), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(decode(&long).map(<[u8]>::len), Some(100));
        assert_eq!(decode(&encode(&[]).unwrap()), Some(&[][..]));
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let mut frame = encode(&[9u8; 8]).unwrap();
        frame.truncate(HEADER_LEN + 3);
        assert_eq!(decode(&frame), None);
        assert_eq!(decode(&[0, 0]), None);
    }

    #[test]
    fn test_decode_raw_matches_decode() {
        let first = encode(&[5u8; 4]).unwrap();
        let second = encode(&[6u8; 100]).unwrap();
        let a = unsafe { decode_raw(first.as_ptr()) };
        let b = unsafe { decode_raw(second.as_ptr()) };
        assert_eq!(a, &[5u8; 4]);
        assert_eq!(b.len(), 100);
    }

    #[test]
    fn test_encode_into_stack_buffer() {
        let mut buf = [0u8; HEADER_LEN + ISR_PAYLOAD_MAX];
        let frame = encode_into(&[1, 2], &mut buf).unwrap();
        assert_eq!(decode(frame), Some(&[1u8, 2][..]));
        let mut buf = [0u8; HEADER_LEN + ISR_PAYLOAD_MAX];
        assert!(encode_into(&[0u8; ISR_PAYLOAD_MAX + 1], &mut buf).is_none());
    }

    #[test]
    fn test_framed_bases() {
        let bases = FramedBases::new();
        let a = c"A".as_ptr() as *const u8;
        let b = c"B".as_ptr() as *const u8;
        assert!(!bases.contains(a));
        assert!(bases.mark(a));
        assert!(bases.mark(a));
        assert!(bases.contains(a));
        assert!(!bases.contains(b));
        assert!(!bases.mark(std::ptr::null()));
    }

    #[test]
    fn test_framed_bases_full() {
        let bases = FramedBases::new();
        let names: Vec<_> = (0..=FramedBases::CAPACITY).map(|i| vec![i as u8 + 1; 2]).collect();
        for name in &names[..FramedBases::CAPACITY] {
            assert!(bases.mark(name.as_ptr()));
        }
        assert!(!bases.mark(names[FramedBases::CAPACITY].as_ptr()));
    }

    #[test]
    fn test_purge_loop_drops_only_its_contexts() {
        let mut contexts = HandlerContexts::new();
        let doomed = EventLoopHandle(1);
        let other = EventLoopHandle(2);
        contexts.insert(EventHandlerInstance(10), LoopTarget::Handle(doomed), "a");
        contexts.insert(EventHandlerInstance(11), LoopTarget::Handle(doomed), "b");
        contexts.insert(EventHandlerInstance(12), LoopTarget::Handle(other), "c");
        contexts.insert(EventHandlerInstance(13), LoopTarget::Default, "d");

        assert_eq!(contexts.purge_loop(doomed), 2);
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts.remove(EventHandlerInstance(10)), None);
        assert_eq!(contexts.remove(EventHandlerInstance(12)), Some("c"));
        assert_eq!(contexts.purge_loop(doomed), 0);
    }
}
