pub mod block_rewards;
pub mod coinbase;
pub mod constants;
pub mod merkle;
pub mod pot_iterations;
pub mod verifier;
