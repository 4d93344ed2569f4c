//! Option reconciliation shared by every option-based variable kind.
//!
//! After an update fetched a fresh option list, the variable's requested value
//! is validated against it:
//!
//! 1. Empty options: the "All" sentinel when `include_all`/`default_to_all` is
//!    set, otherwise an empty selection. Never an error.
//! 2. Current value is "All": kept when `include_all`, otherwise the default.
//! 3. Single select: the matching option is kept (its label becomes the text),
//!    otherwise the first option is selected.
//! 4. Multi select: the surviving subset is kept in selection order, otherwise
//!    the first option (or "All" when `default_to_all`).
//!
//! Reconciling twice against the same options yields the same selection.

use crate::constants::{ALL_VARIABLE_TEXT, ALL_VARIABLE_VALUE, NO_VALUE};

use super::{VariableOption, VariableValue};

/// Multi-value flags that influence reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiValueSettings {
    /// Multiple values may be selected
    pub is_multi: bool,
    /// An "All" option is offered
    pub include_all: bool,
    /// Fall back to "All" instead of the first option
    pub default_to_all: bool,
}

/// A resolved value with its display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected value(s)
    pub value: VariableValue,
    /// Display text(s) matching `value`
    pub text: VariableValue,
}

impl Selection {
    fn all(settings: MultiValueSettings) -> Self {
        if settings.is_multi {
            Self {
                value: VariableValue::multi([ALL_VARIABLE_VALUE]),
                text: VariableValue::multi([ALL_VARIABLE_TEXT]),
            }
        } else {
            Self {
                value: VariableValue::single(ALL_VARIABLE_VALUE),
                text: VariableValue::single(ALL_VARIABLE_TEXT),
            }
        }
    }

    fn empty(settings: MultiValueSettings) -> Self {
        if settings.is_multi {
            Self {
                value: VariableValue::Multi(Vec::new()),
                text: VariableValue::Multi(Vec::new()),
            }
        } else {
            Self {
                value: VariableValue::single(NO_VALUE),
                text: VariableValue::single(NO_VALUE),
            }
        }
    }

    fn first_option(options: &[VariableOption], settings: MultiValueSettings) -> Self {
        if settings.default_to_all {
            return Self::all(settings);
        }
        let Some(first) = options.first() else {
            return Self::empty(settings);
        };
        if settings.is_multi {
            Self {
                value: VariableValue::multi([first.value.as_str()]),
                text: VariableValue::multi([first.label.as_str()]),
            }
        } else {
            Self {
                value: VariableValue::single(first.value.as_str()),
                text: VariableValue::single(first.label.as_str()),
            }
        }
    }
}

/// Validate `current` against `options`.
pub fn reconcile(
    options: &[VariableOption],
    current: &VariableValue,
    settings: MultiValueSettings,
) -> Selection {
    if options.is_empty() {
        if settings.default_to_all || settings.include_all {
            return Selection::all(settings);
        }
        return Selection::empty(settings);
    }

    if current.is_all() {
        if settings.include_all {
            return Selection::all(settings);
        }
        return Selection::first_option(options, settings);
    }

    if settings.is_multi {
        let mut values = Vec::new();
        let mut texts = Vec::new();
        for value in current.as_slice() {
            if values.contains(value) {
                continue;
            }
            if let Some(option) = options.iter().find(|o| &o.value == value) {
                values.push(option.value.clone());
                texts.push(option.label.clone());
            }
        }

        if values.is_empty() {
            return Selection::first_option(options, settings);
        }
        return Selection {
            value: VariableValue::Multi(values),
            text: VariableValue::Multi(texts),
        };
    }

    let requested = current.first().unwrap_or(NO_VALUE);
    match options.iter().find(|o| o.value == requested) {
        Some(option) => Selection {
            value: VariableValue::single(option.value.as_str()),
            text: VariableValue::single(option.label.as_str()),
        },
        None => Selection::first_option(options, settings),
    }
}

/// Display text for `value`, taken from the option labels where possible.
pub fn text_for_value(value: &VariableValue, options: &[VariableOption]) -> VariableValue {
    if value.is_all() {
        return match value {
            VariableValue::Single(_) => VariableValue::single(ALL_VARIABLE_TEXT),
            VariableValue::Multi(_) => VariableValue::multi([ALL_VARIABLE_TEXT]),
        };
    }

    let label_of = |v: &String| {
        options.iter().find(|o| &o.value == v).map_or_else(|| v.clone(), |o| o.label.clone())
    };
    match value {
        VariableValue::Single(v) => VariableValue::Single(label_of(v)),
        VariableValue::Multi(values) => VariableValue::Multi(values.iter().map(label_of).collect()),
    }
}
