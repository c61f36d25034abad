//! Per-request context passed down the middleware chain.
//!
//! Carries the [`Request`] and a type-keyed [`Extensions`] map through which
//! middleware hands state to the layers below it. [`ResponseCache`] inserts
//! the request's [`CacheKey`] there, for example.
//!
//! [`ResponseCache`]: crate::cache::ResponseCache
//! [`CacheKey`]: crate::cache::CacheKey

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::http::Request;

/// Type-erased map holding at most one value per type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Consumes the context, returning the request.
    pub fn into_request(self) -> Request {
        self.request
    }
}
