// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seams to the host's expression language.
//!
//! Templates are compiled once when the configuration is loaded and
//! evaluated against a request context every time a unit of work completes.
//! The two steps are separate traits so a host can plug in its own language.

use crate::errors::ResolveError;

/// Load-time half: turns template source into the host's compiled form.
pub trait TemplateCompiler {
    type Template;

    fn compile(&self, source: &str) -> Result<Self::Template, ResolveError>;

    /// Whether `variable` can ever be resolved. A `false` disables the
    /// dimension or condition that depends on it.
    fn exists(&self, variable: &str) -> bool;
}

/// Request-time half: evaluates a compiled template against `C`.
pub trait ValueResolver<C: ?Sized> {
    type Template;

    fn resolve(&self, ctx: &C, template: &Self::Template) -> Result<String, ResolveError>;
}
