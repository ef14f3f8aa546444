use core::fmt;

/// A value shown by a UI collaborator. The set of setting kinds is closed.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Toggle(bool),
    EnumSelect { selected: usize, options: &'static [&'static str] },
    NumericRange { value: i64, min: i64, max: i64, step: i64 },
    Text(String),
}

impl SettingValue {
    pub fn range(value: i64, min: i64, max: i64, step: i64) -> Self {
        SettingValue::NumericRange { value, min, max, step }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Toggle(v) => write!(f, "{}", if *v { "on" } else { "off" }),
            SettingValue::EnumSelect { selected, options } => {
                write!(f, "{}", options.get(*selected).copied().unwrap_or("?"))
            }
            SettingValue::NumericRange { value, .. } => write!(f, "{}", value),
            SettingValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Named value for display
pub type DisplayValue = (&'static str, SettingValue);
