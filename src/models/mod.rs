mod visit;

pub use visit::{NewVisit, Visit, VisitLog};

pub(crate) use visit::VisitRow;
