//! MCPWM 比较器

use std::sync::Arc;

use super::operator::Operator;
use super::{ComparatorConfig, STALE_COMPARATOR};
use crate::arena::ArenaKey;
use crate::driver::{Driver, McpwmComparatorHandle, McpwmOperatorHandle};
use crate::error::{Error, Result};

pub(super) struct ComparatorNode<D: Driver> {
    driver: Arc<D>,
    handle: McpwmComparatorHandle,
    config: ComparatorConfig,
    compare_value: u32,
}

impl<D: Driver> ComparatorNode<D> {
    pub(super) fn new(driver: Arc<D>, operator: McpwmOperatorHandle, config: ComparatorConfig) -> Result<Self> {
        let handle = driver_try!(driver.mcpwm_new_comparator(operator, &config), "mcpwm_new_comparator");
        let node = Self {
            driver,
            handle,
            config,
            compare_value: 0,
        };
        driver_try!(
            node.driver.mcpwm_comparator_set_compare_value(node.handle, 0),
            "mcpwm_comparator_set_compare_value"
        );
        Ok(node)
    }

    pub(super) fn handle(&self) -> McpwmComparatorHandle {
        self.handle
    }
}

impl<D: Driver> Drop for ComparatorNode<D> {
    fn drop(&mut self) {
        teardown!(self.driver.mcpwm_del_comparator(self.handle), "mcpwm_del_comparator");
    }
}

/// 比较器句柄
pub struct Comparator<D: Driver> {
    operator: Operator<D>,
    key: ArenaKey,
}

impl<D: Driver> Comparator<D> {
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
        self.with_node(|_| Ok(())).is_ok()
    }

    pub fn handle(&self) -> Result<McpwmComparatorHandle> {
        self.with_node(|node| Ok(node.handle))
    }

    pub fn config(&self) -> Result<ComparatorConfig> {
        self.with_node(|node| Ok(node.config))
    }

    /// 最近一次成功写入的比较值
    pub fn compare_value(&self) -> Result<u32> {
        self.with_node(|node| Ok(node.compare_value))
    }

    pub fn set_compare_value(&self, value: u32) -> Result<()> {
        self.with_node(|node| {
            driver_try!(
                node.driver.mcpwm_comparator_set_compare_value(node.handle, value),
                "mcpwm_comparator_set_compare_value"
            );
            node.compare_value = value;
            Ok(())
        })
    }

    fn with_node<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ComparatorNode<D>) -> Result<R>,
    {
        self.operator.timer().with_operator(self.operator.key(), |operator| {
            let node = operator
                .comparators
                .get_mut(self.key)
                .ok_or(Error::InvalidArgument(STALE_COMPARATOR))?;
            f(node)
        })
    }
}

impl<D: Driver> Clone for Comparator<D> {
    fn clone(&self) -> Self {
        Self {
            operator: self.operator.clone(),
            key: self.key,
        }
    }
}

impl<D: Driver> std::fmt::Debug for Comparator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparator").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChipLayout;
    use crate::driver::mock::MockDriver;
    use crate::error::{codes, ErrorKind};
    use crate::peripherals::mcpwm::{Mcpwm, OperatorConfig, TimerConfig};

    #[test]
    fn test_compare_value_committed_on_success() {
        let driver = Arc::new(MockDriver::new());
        let mcpwm = Mcpwm::new(driver.clone(), ChipLayout::ESP32S3);
        let timer = mcpwm.timer(&TimerConfig::default()).unwrap();
        let operator = timer.add_operator(&OperatorConfig::default()).unwrap();
        let comparator = operator.add_comparator(&ComparatorConfig::default()).unwrap();
        assert_eq!(comparator.compare_value().unwrap(), 0);

        comparator.set_compare_value(250).unwrap();
        assert_eq!(comparator.compare_value().unwrap(), 250);
        assert_eq!(driver.compare_value(comparator.handle().unwrap()), Some(250));

        driver.fail_next("mcpwm_comparator_set_compare_value", codes::ESP_ERR_INVALID_ARG);
        assert!(comparator.set_compare_value(9999).is_err());
        assert_eq!(comparator.compare_value().unwrap(), 250);
    }

    #[test]
    fn test_removed_comparator_is_stale() {
        let driver = Arc::new(MockDriver::new());
        let mcpwm = Mcpwm::new(driver.clone(), ChipLayout::ESP32S3);
        let timer = mcpwm.timer(&TimerConfig::default()).unwrap();
        let operator = timer.add_operator(&OperatorConfig::default()).unwrap();
        let comparator = operator.add_comparator(&ComparatorConfig::default()).unwrap();
        let copy = comparator.clone();
        operator.remove_comparator(comparator).unwrap();
        assert!(!copy.is_alive());
        assert_eq!(copy.set_compare_value(1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            operator.remove_comparator(copy).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(driver.calls("mcpwm_del_comparator"), 1);
    }
}
