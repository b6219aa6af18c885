//! Member injection
//!
//! Populates instances the graph did not construct. Finding the injection
//! points of a type is up to the caller; each [`InjectionPoint`] declares its
//! dependencies and how to apply the produced values.

use crate::graph::Graph;
use bindery_core::{Args, BoxError, ConstructionError, CreationError, Dependency, Key, KeyPath};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Apply<T> = Arc<dyn Fn(&mut T, &Args) -> Result<(), BoxError> + Send + Sync>;

/// A field or setter of `T` fed from the graph
pub struct InjectionPoint<T> {
    name: String,
    dependencies: Vec<Dependency>,
    apply: Apply<T>,
}

impl<T: 'static> InjectionPoint<T> {
    /// Point reading `dependencies` from [`Args`] inside `apply`
    pub fn new<F>(name: impl Into<String>, dependencies: Vec<Dependency>, apply: F) -> Self
    where
        F: Fn(&mut T, &Args) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies,
            apply: Arc::new(apply),
        }
    }

    /// Point setting one required value of type `D`
    ///
    /// ```rust,ignore
    /// let point = InjectionPoint::setter("logger", Key::of::<dyn Logger>(), |job: &mut Job, l| {
    ///     job.logger = Some(l);
    /// });
    /// ```
    pub fn setter<D, F>(name: impl Into<String>, key: Key, set: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&mut T, Arc<D>) + Send + Sync + 'static,
    {
        let dependency = Dependency::key(key.clone());
        Self::new(name, vec![dependency], move |target: &mut T, args: &Args| {
            set(target, args.get_key::<D>(&key)?);
            Ok(())
        })
    }

    /// Point setting a value of type `D` only when `key` is bound
    pub fn optional_setter<D, F>(name: impl Into<String>, key: Key, set: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&mut T, Option<Arc<D>>) + Send + Sync + 'static,
    {
        let dependency = Dependency::key(key.clone()).as_optional();
        Self::new(name, vec![dependency], move |target: &mut T, args: &Args| {
            set(target, args.optional_key::<D>(&key)?);
            Ok(())
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

impl<T> Clone for InjectionPoint<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            dependencies: self.dependencies.clone(),
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<T> fmt::Debug for InjectionPoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionPoint")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Feed every injection point of `instance` from this graph
    ///
    /// All dependencies are validated before any setter runs, so a missing
    /// binding leaves `instance` untouched. Points are then applied in
    /// order; when producing a value or running a setter fails, the points
    /// before it have already been applied.
    pub fn populate<T: 'static>(
        &self,
        instance: &mut T,
        points: &[InjectionPoint<T>],
    ) -> Result<(), ConstructionError> {
        let inner = self.inner();
        inner.ensure_open()?;

        let mut errors = Vec::new();
        for dependency in points.iter().flat_map(|p| &p.dependencies) {
            let target = dependency.target();
            if dependency.is_optional() && !inner.can_resolve(target) {
                continue;
            }
            if let Err(error) = inner.ensure_validated(target) {
                errors.push(error);
            }
        }
        CreationError::check(errors).map_err(CreationError::into_single)?;

        let dependent = Key::of::<T>();
        for point in points {
            let args =
                inner.collect_with(&dependent, &point.dependencies, None, |closure, target| {
                    closure.contains(target)
                })?;
            (point.apply)(instance, &args).map_err(|e| {
                ConstructionError::production_failure(dependent.clone(), KeyPath::new(), e)
            })?;
            debug!(target = %dependent, point = %point.name, "member injected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::{GraphBuilder, Stage};
    use bindery_core::{Binder, ErrorKind};

    #[derive(Default)]
    struct Job {
        name: Option<Arc<String>>,
        retries: Option<Arc<u8>>,
    }

    fn points() -> Vec<InjectionPoint<Job>> {
        vec![
            InjectionPoint::setter("name", Key::named::<String>("job"), |job: &mut Job, v| {
                job.name = Some(v);
            }),
            InjectionPoint::optional_setter("retries", Key::of::<u8>(), |job: &mut Job, v| {
                job.retries = v;
            }),
        ]
    }

    #[test]
    fn populates_required_and_skips_absent_optional() {
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(|b: &mut Binder| {
                b.bind::<String>().named("job").to_instance(Arc::new("nightly".into()));
            })
            .build()
            .unwrap();
        let mut job = Job::default();
        graph.populate(&mut job, &points()).unwrap();
        assert_eq!(job.name.as_deref().map(String::as_str), Some("nightly"));
        assert!(job.retries.is_none());
    }

    #[test]
    fn missing_dependency_leaves_instance_untouched() {
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(|b: &mut Binder| {
                b.bind::<u8>().to_instance(Arc::new(3));
            })
            .build()
            .unwrap();
        let mut job = Job::default();
        let err = graph.populate(&mut job, &points()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBinding);
        assert!(job.name.is_none());
        assert!(job.retries.is_none());
    }

    #[test]
    fn bound_optional_is_injected() {
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(|b: &mut Binder| {
                b.bind::<String>().named("job").to_instance(Arc::new("nightly".into()));
                b.bind::<u8>().to_instance(Arc::new(3));
            })
            .build()
            .unwrap();
        let mut job = Job::default();
        graph.populate(&mut job, &points()).unwrap();
        assert_eq!(job.retries.as_deref(), Some(&3));
    }

    #[test]
    fn failing_setter_keeps_earlier_points() {
        let graph = GraphBuilder::new(Stage::Lenient)
            .module(|b: &mut Binder| {
                b.bind::<String>().named("job").to_instance(Arc::new("nightly".into()));
            })
            .build()
            .unwrap();
        let mut points = points();
        points.push(InjectionPoint::new("schedule", vec![], |_: &mut Job, _: &Args| {
            Err("no schedule".into())
        }));

        let mut job = Job::default();
        let err = graph.populate(&mut job, &points).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProductionFailure);
        assert_eq!(job.name.as_deref().map(String::as_str), Some("nightly"));
    }
}
