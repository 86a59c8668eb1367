#[cfg(test)]
mod blockchain;
#[cfg(test)]
mod coin_store;
#[cfg(test)]
mod common;
#[cfg(test)]
mod consensus;
#[cfg(test)]
mod full_node;
#[cfg(test)]
mod mempool;
