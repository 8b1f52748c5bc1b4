pub mod distribution;
pub mod page_one;

pub use distribution::{
    AnchorInputs, MarketAnchor, MarketAnchorService, RankDistribution, compute_market_anchor,
    compute_rank_distribution,
};
pub use page_one::{PAGE_SIZE, build_page_one, page_seed};
