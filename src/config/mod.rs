// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod core;
pub mod loader;
pub mod validation;

pub use core::ExtractionOptions;
pub use loader::OptionsLoader;
pub use validation::OptionsValidator;
