pub mod audit;
pub mod cancel;
pub mod config;
pub mod console;
pub mod correct;
pub mod date;
pub mod engine;
pub mod ledger;
pub mod media;
pub mod ownership;
pub mod paths;
pub mod placement;
pub mod post_process;
pub mod reclaim;
pub mod report;
pub mod storage;
pub mod util;
pub mod warn;
