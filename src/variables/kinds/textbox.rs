//! Text box variables: a free-text value set by the user.

use serde::{Deserialize, Serialize};

/// Configuration of a text box variable. The text itself is the variable's value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBoxConfig {}
