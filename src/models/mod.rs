pub mod enums;
pub mod contact;
pub mod dose;
pub mod medication;
pub mod reminder;

pub use contact::*;
pub use dose::*;
pub use medication::*;
pub use reminder::*;
