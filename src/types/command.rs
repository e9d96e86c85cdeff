use std::time::Duration;

use crate::types::SqlValue;

/// How the SQL text of a `Command` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandType {
    /// Plain SQL text.
    #[default]
    Text,
    /// The SQL text is the name of a function or procedure.
    StoredProcedure,
    /// The SQL text is the name of a table to read in full.
    TableDirect,
}

/// Flags controlling what `execute_reader` keeps from a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandBehavior {
    #[default]
    Default,
    /// Only the first result set is read.
    SingleResult,
    /// Only the first row is kept.
    SingleRow,
    /// Only column information is kept.
    SchemaOnly,
}

/// Parameters bound to a command.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Parameters {
    #[default]
    None,
    /// Values for `$1..$n` placeholders, in order.
    Positional(Vec<SqlValue>),
    /// Values for `@name` / `:name` placeholders.
    Named(Vec<(String, SqlValue)>),
}

impl Parameters {
    /// Start an empty set of named parameters.
    pub fn named() -> Self {
        Parameters::Named(Vec::new())
    }

    /// Add a named parameter. Converts positional or empty parameters to named.
    /// Adding a name twice replaces the earlier value.
    pub fn add(self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let mut named = match self {
            Parameters::Named(named) => named,
            Parameters::None | Parameters::Positional(_) => Vec::new(),
        };
        let name = name.into();
        let value = value.into();
        match named.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => named.push((name, value)),
        }
        Parameters::Named(named)
    }

    /// Looks up a named parameter, ignoring ASCII case and a leading `@` or `:`.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let name = name.trim_start_matches(['@', ':']);
        match self {
            Parameters::Named(named) => named
                .iter()
                .find(|(n, _)| n.trim_start_matches(['@', ':']).eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Parameters::None => 0,
            Parameters::Positional(values) => values.len(),
            Parameters::Named(named) => named.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<SqlValue>> for Parameters {
    fn from(values: Vec<SqlValue>) -> Self {
        Parameters::Positional(values)
    }
}

impl From<&[SqlValue]> for Parameters {
    fn from(values: &[SqlValue]) -> Self {
        Parameters::Positional(values.to_vec())
    }
}

/// A command to run against a connection: SQL, parameters and options.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use pgmap::{Command, Parameters};
///
/// let command = Command::new("SELECT id, name FROM users WHERE name = @name")
///     .params(Parameters::named().add("name", "Alice"))
///     .timeout(Duration::from_secs(5));
/// assert_eq!(command.params.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub sql: String,
    pub params: Parameters,
    pub timeout: Option<Duration>,
    pub command_type: CommandType,
}

impl Command {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// A command calling the named function or procedure.
    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self::new(name).command_type(CommandType::StoredProcedure)
    }

    /// A command reading every row of the named table.
    pub fn table_direct(name: impl Into<String>) -> Self {
        Self::new(name).command_type(CommandType::TableDirect)
    }

    pub fn params(mut self, params: impl Into<Parameters>) -> Self {
        self.params = params.into();
        self
    }

    /// Convenience for adding one named parameter.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.params = self.params.add(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command_type(mut self, command_type: CommandType) -> Self {
        self.command_type = command_type;
        self
    }
}

impl From<&str> for Command {
    fn from(sql: &str) -> Self {
        Command::new(sql)
    }
}

impl From<String> for Command {
    fn from(sql: String) -> Self {
        Command::new(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_parameters_replace_duplicates() {
        let params = Parameters::named().add("id", 1).add("ID", 2);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("@id"), Some(&SqlValue::Int32(2)));
    }

    #[test]
    fn test_add_converts_positional_to_named() {
        let params = Parameters::from(vec![SqlValue::Int32(1)]).add("name", "x");
        assert_eq!(params, Parameters::Named(vec![("name".to_string(), "x".into())]));
    }

    #[test]
    fn test_command_builder() {
        let command = Command::stored_procedure("get_user").bind("id", 5i64);
        assert_eq!(command.command_type, CommandType::StoredProcedure);
        assert_eq!(command.params.get("id"), Some(&SqlValue::Int64(5)));
        assert_eq!(command.timeout, None);
    }
}
