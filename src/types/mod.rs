//! Data types shared by the worker protocol, the cell store and the resolver.

mod cell;
mod rich_text;
mod selection;
mod style;
mod viewport;
mod visual;
mod workbook;

pub use cell::*;
pub use rich_text::*;
pub use selection::*;
pub use style::*;
pub use viewport::*;
pub use visual::*;
pub use workbook::*;
