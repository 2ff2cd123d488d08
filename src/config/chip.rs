//! 芯片外设布局定义
//!
//! 描述每种芯片上各外设的数量，注册表的容量和越界检查都以此为准

/// 芯片外设布局
///
/// 包含 ADC、GPIO 和 MCPWM 的数量信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipLayout {
    /// 芯片名称
    pub name: &'static str,

    /// 每个 ADC 单元的通道数，下标即单元编号
    pub adc_channels: &'static [usize],

    /// GPIO 编号上限（不含）
    pub gpio_count: usize,

    /// 编号范围内但芯片上不存在的 GPIO
    pub missing_gpios: &'static [u8],

    /// MCPWM 组数
    pub mcpwm_groups: usize,
}

/// ESP32-S3 布局
///
/// - ADC1 / ADC2 各 10 个通道
/// - GPIO0 ~ GPIO48，其中 GPIO22 ~ GPIO25 不存在
/// - 2 个 MCPWM 组
pub const ESP32S3: ChipLayout = ChipLayout {
    name: "esp32s3",
    adc_channels: &[10, 10],
    gpio_count: 49,
    missing_gpios: &[22, 23, 24, 25],
    mcpwm_groups: 2,
};

/// ESP32 布局
///
/// - ADC1 8 个通道，ADC2 10 个通道
/// - GPIO0 ~ GPIO39，其中 GPIO20、GPIO24、GPIO28 ~ GPIO31 不存在
/// - 2 个 MCPWM 组
pub const ESP32: ChipLayout = ChipLayout {
    name: "esp32",
    adc_channels: &[8, 10],
    gpio_count: 40,
    missing_gpios: &[20, 24, 28, 29, 30, 31],
    mcpwm_groups: 2,
};

impl ChipLayout {
    pub const ESP32S3: ChipLayout = ESP32S3;
    pub const ESP32: ChipLayout = ESP32;

    /// 当前编译目标对应的布局，主机上默认 ESP32-S3
    pub const fn current() -> ChipLayout {
        #[cfg(esp32)]
        {
            ESP32
        }
        #[cfg(not(esp32))]
        {
            ESP32S3
        }
    }

    /// ADC 单元数量
    pub fn adc_units(&self) -> usize {
        self.adc_channels.len()
    }

    /// 指定 ADC 单元的通道数，单元不存在时为 0
    pub fn adc_channels_for(&self, unit: u8) -> usize {
        self.adc_channels.get(unit as usize).copied().unwrap_or(0)
    }

    /// 检查 GPIO 编号是否存在于芯片上
    pub fn is_valid_gpio(&self, pin: u8) -> bool {
        (pin as usize) < self.gpio_count && !self.missing_gpios.contains(&pin)
    }

    /// 验证布局的有效性
    ///
    /// # 返回
    /// * `Ok(())` - 布局有效
    /// * `Err(String)` - 布局无效，包含错误信息
    pub fn validate(&self) -> Result<(), String> {
        if self.adc_channels.is_empty() {
            return Err(format!("{}: 至少需要一个 ADC 单元", self.name));
        }
        if let Some(unit) = self.adc_channels.iter().position(|&count| count == 0) {
            return Err(format!("{}: ADC{} 没有通道", self.name, unit + 1));
        }
        if self.gpio_count == 0 || self.gpio_count > 64 {
            return Err(format!("{}: GPIO 数量 {} 无效", self.name, self.gpio_count));
        }
        for &pin in self.missing_gpios {
            if pin as usize >= self.gpio_count {
                return Err(format!("{}: 缺失引脚 {pin} 超出 GPIO 范围", self.name));
            }
        }
        Ok(())
    }
}

impl Default for ChipLayout {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_layouts_are_valid() {
        assert_eq!(ESP32S3.validate(), Ok(()));
        assert_eq!(ESP32.validate(), Ok(()));
    }

    #[test]
    fn test_gpio_holes() {
        assert!(ESP32S3.is_valid_gpio(21));
        assert!(!ESP32S3.is_valid_gpio(22));
        assert!(ESP32S3.is_valid_gpio(48));
        assert!(!ESP32S3.is_valid_gpio(49));
        assert!(!ESP32.is_valid_gpio(24));
    }

    #[test]
    fn test_adc_channel_counts() {
        assert_eq!(ESP32.adc_units(), 2);
        assert_eq!(ESP32.adc_channels_for(0), 8);
        assert_eq!(ESP32.adc_channels_for(1), 10);
        assert_eq!(ESP32.adc_channels_for(2), 0);
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let layout = ChipLayout { missing_gpios: &[70], ..ESP32S3 };
        assert!(layout.validate().is_err());
    }
}
