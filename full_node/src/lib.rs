pub mod block_store;
pub mod blockchain;
pub mod coin_store;
pub mod consensus;
pub mod db;
pub mod full_node;
pub mod mempool;
pub mod sync_store;
