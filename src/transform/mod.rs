pub mod portfolio;
pub mod token;

pub use portfolio::{filter_and_limit, PortfolioData};
pub use token::TokenSearchData;
