mod header_validation;
mod pot_iterations;
