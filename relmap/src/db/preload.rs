//! Batched eager loading of associations.
//!
//! Requested paths are resolved up front into a flat list of steps sorted by
//! depth. Each step loads one association for every entity reachable through
//! its already loaded parents, with a single `IN (...)` query when the root
//! is a slice or a to-many association sits on the way.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::db::executor::{Driver, fetch_row, fetch_rows};
use crate::db::interfaces::{DynEntity, Entity, EntityDescriptor};
use crate::db::query::{Queries, Query, where_query};
use crate::db::schema::{Association, Cardinality, Schema, registry};
use crate::db::value::{Key, Params, Row, Value};
use crate::errors::{Error, Result};

/// Entry points of a preload: one entity or a sequence of them.
pub enum Roots<'a> {
    One(&'a mut (dyn DynEntity + 'static)),
    Many(Vec<&'a mut (dyn DynEntity + 'static)>),
}

impl<'a> Roots<'a> {
    fn into_vec(self) -> Vec<&'a mut (dyn DynEntity + 'static)> {
        match self {
            Roots::One(e) => vec![e],
            Roots::Many(v) => v,
        }
    }
}

/// Anything associations can be preloaded into. `#[derive(Entity)]`
/// implements it for the entity itself; slices and vectors of entities are
/// covered here.
pub trait Preloadable {
    fn root_entity(&self) -> &'static EntityDescriptor;

    fn roots(&mut self) -> Roots<'_>;
}

impl<E: Entity> Preloadable for [E] {
    fn root_entity(&self) -> &'static EntityDescriptor {
        E::entity()
    }

    fn roots(&mut self) -> Roots<'_> {
        Roots::Many(
            self.iter_mut()
                .map(|e| e as &mut (dyn DynEntity + 'static))
                .collect(),
        )
    }
}

impl<E: Entity> Preloadable for Vec<E> {
    fn root_entity(&self) -> &'static EntityDescriptor {
        E::entity()
    }

    fn roots(&mut self) -> Roots<'_> {
        self.as_mut_slice().roots()
    }
}

#[derive(Debug, Clone)]
struct Step {
    path: String,
    /// Relation fields leading from the roots to the owners of this step.
    parents: Vec<&'static str>,
    depth: usize,
    owner: Arc<Schema>,
    association: Association,
    /// At most one owner: a single root reached through to-one relations only.
    single: bool,
}

impl Step {
    fn target(&self) -> Result<&Schema> {
        self.association.schema.as_deref().ok_or_else(|| {
            Error::configuration(format!("{} has no referenced entity", self.path))
        })
    }
}

fn resolve(root: &'static EntityDescriptor, single_root: bool, path: &str) -> Result<Vec<Step>> {
    let mut schema = registry().get(root)?;
    let mut parents = Vec::new();
    let mut single = single_root;
    let mut steps = Vec::new();
    let segments = path.split('.').collect::<Vec<_>>();

    for (idx, segment) in segments.iter().enumerate() {
        let association = schema.associations.get(*segment).cloned().ok_or_else(|| {
            Error::configuration(format!(
                "{} has no association named '{}' (path '{}')",
                schema.type_name, segment, path
            ))
        })?;

        let target = match (association.cardinality, association.target()) {
            (Cardinality::Unknown, _) | (_, None) => {
                return Err(Error::configuration(format!(
                    "{}.{} has an unknown cardinality",
                    schema.type_name, segment
                )));
            }
            (_, Some(target)) => target,
        };

        let field = association.field;
        let to_many = association.cardinality == Cardinality::ToMany;
        steps.push(Step {
            path: segments[..=idx].join("."),
            parents: parents.clone(),
            depth: idx + 1,
            owner: Arc::clone(&schema),
            association,
            single,
        });

        if to_many {
            single = false;
        }
        parents.push(field);
        schema = registry().get(target)?;
    }

    Ok(steps)
}

/// Entities reached from `roots` by following the already populated `parents`.
fn descend<'a>(
    roots: Vec<&'a mut (dyn DynEntity + 'static)>,
    parents: &[&str],
) -> Vec<&'a mut (dyn DynEntity + 'static)> {
    let mut current = roots;
    for parent in parents {
        current = current
            .into_iter()
            .flat_map(|e| e.associated_mut(parent))
            .collect();
    }
    current
}

fn key_of(row: &Row, column: &str) -> Option<Key> {
    row.get(column).and_then(Key::from_value)
}

/// Issues preload queries and keeps a record of each of them, including the
/// ones issued before a failure.
pub struct Preloader<'d, D: Driver> {
    driver: &'d D,
    queries: Queries,
}

impl<'d, D: Driver> Preloader<'d, D> {
    pub fn new(driver: &'d D) -> Self {
        Self {
            driver,
            queries: Vec::new(),
        }
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn into_queries(self) -> Queries {
        self.queries
    }

    /// Loads `paths` into `root`. A path that cannot be resolved is skipped
    /// without issuing any of its queries; the other paths still run and the
    /// first such error is returned at the end. A database error stops
    /// everything. Entities already populated are left as they are.
    pub async fn run<P>(&mut self, root: &mut P, paths: &[&str]) -> Result<()>
    where
        P: Preloadable + ?Sized,
    {
        let descriptor = root.root_entity();
        let single_root = matches!(root.roots(), Roots::One(_));

        let mut steps: Vec<Step> = Vec::new();
        let mut first_error = None;
        for path in paths {
            match resolve(descriptor, single_root, path) {
                Ok(resolved) => {
                    for step in resolved {
                        if !steps.iter().any(|s| s.path == step.path) {
                            steps.push(step);
                        }
                    }
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "preload path skipped");
                    first_error.get_or_insert(e);
                }
            }
        }
        steps.sort_by_key(|s| s.depth);

        for step in &steps {
            let owners = descend(root.roots().into_vec(), &step.parents);
            debug!(
                path = %step.path,
                depth = step.depth,
                owners = owners.len(),
                "preloading"
            );
            match (step.single, step.association.cardinality) {
                (true, Cardinality::ToOne) => self.single_to_one(step, owners).await?,
                (true, _) => self.single_to_many(step, owners).await?,
                (false, Cardinality::ToOne) => self.batch_to_one(step, owners).await?,
                (false, _) => self.batch_to_many(step, owners).await?,
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_one(&mut self, query: Query) -> Result<Row> {
        self.queries.push(query.clone());
        fetch_row(self.driver, &query).await
    }

    async fn fetch_all(&mut self, query: Query) -> Result<Vec<Row>> {
        self.queries.push(query.clone());
        fetch_rows(self.driver, &query).await
    }

    fn foreign_key_field(step: &Step) -> Result<&'static str> {
        step.owner
            .field_for_column(&step.association.foreign_key.name)
            .map(|f| f.name)
            .ok_or_else(|| {
                Error::configuration(format!(
                    "{} has no field mapped on {}",
                    step.owner.type_name, step.association.foreign_key.path
                ))
            })
    }

    async fn single_to_one(
        &mut self,
        step: &Step,
        owners: Vec<&mut (dyn DynEntity + 'static)>,
    ) -> Result<()> {
        let fk_field = Self::foreign_key_field(step)?;
        let target = step.target()?;

        for owner in owners {
            let fk = owner.field_value(fk_field).unwrap_or_default();
            if Key::from_value(&fk).is_none() {
                continue;
            }
            let mut params = Params::new();
            params.insert(step.association.reference.name.clone(), fk);
            let row = self.fetch_one(where_query(target, params, true)?).await?;
            owner.load_association(step.association.field, std::slice::from_ref(&row))?;
        }
        Ok(())
    }

    async fn single_to_many(
        &mut self,
        step: &Step,
        owners: Vec<&mut (dyn DynEntity + 'static)>,
    ) -> Result<()> {
        let target = step.target()?;

        for owner in owners {
            let pk = owner.primary_key();
            if Key::from_value(&pk).is_none() {
                owner.load_association(step.association.field, &[])?;
                continue;
            }
            let mut params = Params::new();
            params.insert(step.association.foreign_key.name.clone(), pk);
            let rows = self.fetch_all(where_query(target, params, false)?).await?;
            owner.load_association(step.association.field, &rows)?;
        }
        Ok(())
    }

    /// One query for every distinct foreign key; a fetched row goes to every
    /// owner pointing at it.
    async fn batch_to_one(
        &mut self,
        step: &Step,
        owners: Vec<&mut (dyn DynEntity + 'static)>,
    ) -> Result<()> {
        let fk_field = Self::foreign_key_field(step)?;
        let target = step.target()?;
        let reference = &step.association.reference.name;

        let fks = owners
            .iter()
            .map(|owner| {
                owner
                    .field_value(fk_field)
                    .as_ref()
                    .and_then(Key::from_value)
            })
            .collect::<Vec<_>>();
        let distinct = fks.iter().flatten().cloned().collect::<IndexSet<_>>();
        if distinct.is_empty() {
            return Ok(());
        }

        let mut params = Params::new();
        params.insert(
            reference.clone(),
            Value::List(distinct.iter().map(Key::to_value).collect()),
        );
        let rows = self.fetch_all(where_query(target, params, false)?).await?;

        let by_key = rows
            .into_iter()
            .filter_map(|row| key_of(&row, reference).map(|key| (key, row)))
            .collect::<IndexMap<_, _>>();

        for (owner, fk) in owners.into_iter().zip(fks) {
            if let Some(row) = fk.and_then(|k| by_key.get(&k)) {
                owner.load_association(step.association.field, std::slice::from_ref(row))?;
            }
        }
        Ok(())
    }

    /// One query for every distinct owner key; fetched rows are grouped by
    /// foreign key and handed to their owner.
    async fn batch_to_many(
        &mut self,
        step: &Step,
        owners: Vec<&mut (dyn DynEntity + 'static)>,
    ) -> Result<()> {
        let target = step.target()?;
        let foreign_key = &step.association.foreign_key.name;

        let pks = owners
            .iter()
            .map(|owner| Key::from_value(&owner.primary_key()))
            .collect::<Vec<_>>();
        let distinct = pks.iter().flatten().cloned().collect::<IndexSet<_>>();
        if distinct.is_empty() {
            for owner in owners {
                owner.load_association(step.association.field, &[])?;
            }
            return Ok(());
        }

        let mut params = Params::new();
        params.insert(
            foreign_key.clone(),
            Value::List(distinct.iter().map(Key::to_value).collect()),
        );
        let rows = self.fetch_all(where_query(target, params, false)?).await?;

        let mut groups: IndexMap<Key, Vec<Row>> = IndexMap::new();
        for row in rows {
            if let Some(key) = key_of(&row, foreign_key) {
                groups.entry(key).or_default().push(row);
            }
        }

        for (owner, pk) in owners.into_iter().zip(pks) {
            let rows = pk
                .and_then(|k| groups.get(&k))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            owner.load_association(step.association.field, rows)?;
        }
        Ok(())
    }
}

/// Preloads `paths` (dotted relation field names, e.g. `"author.avatar"`)
/// into `root` and returns the statements issued.
///
/// On failure only the error is returned. Use a [`Preloader`] directly to
/// keep the records of statements issued before it.
pub async fn preload<D, P>(driver: &D, root: &mut P, paths: &[&str]) -> Result<Queries>
where
    D: Driver,
    P: Preloadable + ?Sized,
{
    let mut preloader = Preloader::new(driver);
    preloader.run(root, paths).await?;
    Ok(preloader.into_queries())
}
