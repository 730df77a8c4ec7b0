pub mod credential_pool;
pub mod elasticsearch_service;
pub mod executor;
pub mod fanout;
pub mod freshness;
pub mod harvest;
pub mod recommendations;
pub mod scraper;
pub mod seeds;
pub mod store;
pub mod trending;
pub mod updater;
pub mod youtube_api;

#[cfg(test)]
pub mod testing;
