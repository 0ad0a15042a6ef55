pub mod build;
pub mod configuration;

#[allow(unused_imports)]
pub mod prelude {
    pub use super::build::{self, BuildStatus, Entity as Build, StepTimes};
    pub use super::configuration::{self, Entity as Configuration};
}
