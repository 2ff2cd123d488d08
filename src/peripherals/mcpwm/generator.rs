//! MCPWM 生成器及其动作设置

use std::sync::Arc;

use super::comparator::Comparator;
use super::operator::Operator;
use super::{GeneratorAction, GeneratorConfig, TimerDirection, TimerEvent, STALE_COMPARATOR, STALE_GENERATOR};
use crate::arena::ArenaKey;
use crate::driver::{Driver, McpwmGeneratorHandle, McpwmOperatorHandle};
use crate::error::{Error, Result};

pub(super) struct GeneratorNode<D: Driver> {
    driver: Arc<D>,
    handle: McpwmGeneratorHandle,
    config: GeneratorConfig,
}

impl<D: Driver> GeneratorNode<D> {
    pub(super) fn new(driver: Arc<D>, operator: McpwmOperatorHandle, config: GeneratorConfig) -> Result<Self> {
        let handle = driver_try!(driver.mcpwm_new_generator(operator, &config), "mcpwm_new_generator");
        Ok(Self { driver, handle, config })
    }
}

impl<D: Driver> Drop for GeneratorNode<D> {
    fn drop(&mut self) {
        teardown!(self.driver.mcpwm_del_generator(self.handle), "mcpwm_del_generator");
    }
}

/// 比较事件动作
pub struct CompareEventAction<'a, D: Driver> {
    pub direction: TimerDirection,
    pub comparator: &'a Comparator<D>,
    pub action: GeneratorAction,
}

/// 定时器事件动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEventAction {
    pub direction: TimerDirection,
    pub event: TimerEvent,
    pub action: GeneratorAction,
}

/// 生成器句柄
pub struct Generator<D: Driver> {
    operator: Operator<D>,
    key: ArenaKey,
}

impl<D: Driver> Generator<D> {
    pub(super) fn new(operator: Operator<D>, key: ArenaKey) -> Self {
        Self { operator, key }
    }

    pub fn operator(&self) -> &Operator<D> {
        &self.operator
    }

    pub(super) fn key(&self) -> ArenaKey {
        self.key
    }

    pub fn is_alive(&self) -> bool {
        self.handle().is_ok()
    }

    pub fn handle(&self) -> Result<McpwmGeneratorHandle> {
        self.operator.timer().with_operator(self.operator.key(), |operator| {
            operator
                .generators
                .get(self.key)
                .map(|node| node.handle)
                .ok_or(Error::InvalidArgument(STALE_GENERATOR))
        })
    }

    pub fn config(&self) -> Result<GeneratorConfig> {
        self.operator.timer().with_operator(self.operator.key(), |operator| {
            operator
                .generators
                .get(self.key)
                .map(|node| node.config)
                .ok_or(Error::InvalidArgument(STALE_GENERATOR))
        })
    }

    /// 设置比较事件动作，比较器必须属于同一个操作器
    pub fn set_action_on_compare_event(
        &self,
        direction: TimerDirection,
        comparator: &Comparator<D>,
        action: GeneratorAction,
    ) -> Result<()> {
        if !comparator.operator().same(&self.operator) {
            return Err(Error::InvalidArgument("比较器与生成器不属于同一个操作器"));
        }
        self.operator.timer().with_operator(self.operator.key(), |operator| {
            let comparator = operator
                .comparators
                .get(comparator.key())
                .ok_or(Error::InvalidArgument(STALE_COMPARATOR))?
                .handle();
            let node = operator
                .generators
                .get(self.key)
                .ok_or(Error::InvalidArgument(STALE_GENERATOR))?;
            driver_try!(
                node.driver
                    .mcpwm_generator_set_action_on_compare_event(node.handle, direction, comparator, action),
                "mcpwm_generator_set_action_on_compare_event"
            );
            Ok(())
        })
    }

    /// 依次设置多个比较事件动作，遇到第一个失败即停止
    pub fn set_actions_on_compare_event(&self, actions: &[CompareEventAction<'_, D>]) -> Result<()> {
        for action in actions {
            self.set_action_on_compare_event(action.direction, action.comparator, action.action)?;
        }
        Ok(())
    }

    pub fn set_action_on_timer_event(
        &self,
        direction: TimerDirection,
        event: TimerEvent,
        action: GeneratorAction,
    ) -> Result<()> {
        self.operator.timer().with_operator(self.operator.key(), |operator| {
            let node = operator
                .generators
                .get(self.key)
                .ok_or(Error::InvalidArgument(STALE_GENERATOR))?;
            driver_try!(
                node.driver
                    .mcpwm_generator_set_action_on_timer_event(node.handle, direction, event, action),
                "mcpwm_generator_set_action_on_timer_event"
            );
            Ok(())
        })
    }

    /// 依次设置多个定时器事件动作，遇到第一个失败即停止
    pub fn set_actions_on_timer_event(&self, actions: &[TimerEventAction]) -> Result<()> {
        for action in actions {
            self.set_action_on_timer_event(action.direction, action.event, action.action)?;
        }
        Ok(())
    }
}

impl<D: Driver> Clone for Generator<D> {
    fn clone(&self) -> Self {
        Self {
            operator: self.operator.clone(),
            key: self.key,
        }
    }
}

impl<D: Driver> std::fmt::Debug for Generator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChipLayout;
    use crate::driver::mock::MockDriver;
    use crate::error::{codes, ErrorKind};
    use crate::peripherals::mcpwm::{ComparatorConfig, Mcpwm, OperatorConfig, TimerConfig};

    #[test]
    fn test_compare_actions_batch_stops_at_first_failure() {
        let driver = Arc::new(MockDriver::new());
        let mcpwm = Mcpwm::new(driver.clone(), ChipLayout::ESP32S3);
        let timer = mcpwm.timer(&TimerConfig::default()).unwrap();
        let operator = timer.add_operator(&OperatorConfig::default()).unwrap();
        let comparator = operator.add_comparator(&ComparatorConfig::default()).unwrap();
        let generator = operator.add_generator(&GeneratorConfig::new(6)).unwrap();

        let actions = [
            CompareEventAction {
                direction: TimerDirection::Up,
                comparator: &comparator,
                action: GeneratorAction::Low,
            },
            CompareEventAction {
                direction: TimerDirection::Down,
                comparator: &comparator,
                action: GeneratorAction::High,
            },
        ];
        generator.set_actions_on_compare_event(&actions).unwrap();
        assert_eq!(driver.generator_actions(generator.handle().unwrap()), 2);

        driver.fail_next("mcpwm_generator_set_action_on_compare_event", codes::ESP_FAIL);
        assert!(generator.set_actions_on_compare_event(&actions).is_err());
        assert_eq!(driver.calls("mcpwm_generator_set_action_on_compare_event"), 3);
    }

    #[test]
    fn test_comparator_from_other_operator_rejected() {
        let driver = Arc::new(MockDriver::new());
        let mcpwm = Mcpwm::new(driver.clone(), ChipLayout::ESP32S3);
        let timer = mcpwm.timer(&TimerConfig::default()).unwrap();
        let first = timer.add_operator(&OperatorConfig::default()).unwrap();
        let second = timer.add_operator(&OperatorConfig::default()).unwrap();
        let comparator = first.add_comparator(&ComparatorConfig::default()).unwrap();
        let generator = second.add_generator(&GeneratorConfig::new(7)).unwrap();

        let err = generator
            .set_action_on_compare_event(TimerDirection::Up, &comparator, GeneratorAction::Toggle)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(driver.calls("mcpwm_generator_set_action_on_compare_event"), 0);
    }

    #[test]
    fn test_timer_event_actions() {
        let driver = Arc::new(MockDriver::new());
        let mcpwm = Mcpwm::new(driver.clone(), ChipLayout::ESP32S3);
        let timer = mcpwm.timer(&TimerConfig::default()).unwrap();
        let operator = timer.add_operator(&OperatorConfig::default()).unwrap();
        let generator = operator.add_generator(&GeneratorConfig::new(8)).unwrap();
        generator
            .set_actions_on_timer_event(&[TimerEventAction {
                direction: TimerDirection::Up,
                event: TimerEvent::Empty,
                action: GeneratorAction::High,
            }])
            .unwrap();
        assert_eq!(driver.generator_actions(generator.handle().unwrap()), 1);

        let copy = generator.clone();
        operator.remove_generator(generator).unwrap();
        let err = copy
            .set_action_on_timer_event(TimerDirection::Up, TimerEvent::Full, GeneratorAction::Low)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
