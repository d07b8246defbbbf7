//! SQL text generation: statements, dialect templates and compilers.

pub mod compiler;
pub mod preprocess;
pub mod statement;
pub mod template;

pub use compiler::{Compiled, Compiler, DefaultCompiler, DollarCompiler, Fingerprint};
pub use preprocess::{preprocess, replace_with_dollar_sign};
pub use statement::{OrderBy, Statement, StatementKind};
pub use template::{MySqlTemplate, PostgresTemplate, SqliteTemplate, Template};
