// src/builtin/mod.rs

//! The `builtin` library: scalar types, float arithmetic and a few file
//! utilities.

use crate::dataflow::function::Library;
use crate::dataflow::vtype::Type;

mod file;
mod float;

pub use file::FLOAT_ARRAY;

pub const LIBRARY: &str = "builtin";

pub fn library() -> Library {
    let types = [
        Type::bool(),
        Type::int(),
        Type::float(),
        Type::string(),
        Type::file(),
        file::float_array(),
    ];
    let lib = types.into_iter().fold(Library::new(LIBRARY), Library::with_type);
    float::functions()
        .into_iter()
        .chain(file::functions())
        .fold(lib, Library::with_function)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_lists_types_and_functions() {
        let lib = library();
        assert!(lib.type_named("float").is_some());
        assert!(lib.type_named(FLOAT_ARRAY).is_some());
        let mut names: Vec<_> = lib.functions().map(|f| f.name().to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            ["add", "cat", "div", "exp", "log", "mul", "pow", "sqrt", "sub", "toFile"]
        );
    }
}
