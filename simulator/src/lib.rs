pub mod block_tools;
pub mod keys;
pub mod verifier;
pub mod wallet;
