// Copyright 2025 Labelkeeper Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Custom resource definitions for the labelkeeper operator

pub mod v1_alpha1;

pub use v1_alpha1::LabelSet;
pub use v1_alpha1::LabelSetSpec;
pub use v1_alpha1::LabelSetStatus;
pub use v1_alpha1::PatchStrategy;
pub use v1_alpha1::TargetDescriptor;
