//! Arbitrary parameter parsing: string → typed value conversion
//!
//! Structures carry their parameter as text. The module registry asks this
//! parser to turn that text into the type the module declared. New types are
//! added with [`ParameterParser::register`].

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

type ParseFn = Arc<dyn Fn(&str) -> Result<Box<dyn Any + Send>, String> + Send + Sync>;

struct Converter {
    type_name: &'static str,
    parse: ParseFn,
}

pub struct ParameterParser {
    converters: HashMap<TypeId, Converter>,
}

impl Default for ParameterParser {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ParameterParser {
    /// A parser that knows no types.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// A parser preloaded with text, booleans, integers, floats and paths.
    pub fn with_defaults() -> Self {
        let mut parser = Self::empty();
        parser.register::<String>(|s| Ok(s.to_string()));
        parser.register::<bool>(|s| match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("'{}' is not a boolean", other)),
        });
        parser.register::<i32>(from_str::<i32>);
        parser.register::<i64>(from_str::<i64>);
        parser.register::<u32>(from_str::<u32>);
        parser.register::<u64>(from_str::<u64>);
        parser.register::<f32>(from_str::<f32>);
        parser.register::<f64>(from_str::<f64>);
        parser.register::<PathBuf>(|s| Ok(PathBuf::from(s)));
        parser
    }

    /// Register (or replace) the converter for `T`.
    pub fn register<T: Any + Send>(
        &mut self,
        parse: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    ) {
        let erased: ParseFn =
            Arc::new(move |text| parse(text).map(|v| Box::new(v) as Box<dyn Any + Send>));
        self.converters.insert(
            TypeId::of::<T>(),
            Converter {
                type_name: type_name::<T>(),
                parse: erased,
            },
        );
    }

    pub fn supports<T: Any>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    /// Names of every type the parser can produce.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.converters.values().map(|c| c.type_name).collect();
        names.sort_unstable();
        names
    }

    /// Convert `text` into a `T`.
    pub fn parse<T: Any + Send>(&self, text: &str) -> Result<T, String> {
        let converter = self
            .converters
            .get(&TypeId::of::<T>())
            .ok_or_else(|| format!("no parameter converter for type {}", type_name::<T>()))?;
        let value = (converter.parse)(text).map_err(|e| {
            format!(
                "unable to convert '{}' to {}: {}",
                text, converter.type_name, e
            )
        })?;
        value
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| format!("converter for {} produced another type", converter.type_name))
    }
}

fn from_str<T>(text: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.trim().parse::<T>().map_err(|e| e.to_string())
}
