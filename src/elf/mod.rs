// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Modules
//==================================================================================================

pub mod types;
pub mod validate;
