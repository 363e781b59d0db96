pub mod drovers;
pub mod offers;
pub mod system;
pub mod transfers;
pub mod verification;
