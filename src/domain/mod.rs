pub mod codes;
pub mod notification;
pub mod package;
pub mod payment;
pub mod referral;
pub mod token;
pub mod user;

pub use notification::*;
pub use package::*;
pub use payment::*;
pub use referral::*;
pub use token::*;
pub use user::*;
