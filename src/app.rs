use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::boundary::{BasinSummary, BoundaryClient, BoundaryIndexCache};
use crate::crs::{Crs, Normalizer};
use crate::domain::{
    BasinArtifacts, BasinGeometry, BasinId, BasinOutputSet, BasinPaths, DataSource,
    RasterArtifact, VectorArtifact,
};
use crate::error::BasinError;
use crate::persist::OutputWriter;
use crate::source::SourceFetcher;

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Run the three source fetches on parallel threads.
    pub concurrent: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { concurrent: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub region: String,
    pub basins: Vec<BasinSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub id: String,
    pub name: String,
    pub crs: String,
    pub polygons: usize,
    /// `[min_x, min_y, max_x, max_y]`
    pub bounds: [f64; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub id: String,
    pub name: String,
    pub crs: String,
    pub paths: BasinPaths,
    pub dem_rows: usize,
    pub dem_cols: usize,
    pub flowlines: usize,
    pub roads: usize,
}

impl From<&BasinOutputSet> for FetchResult {
    fn from(output: &BasinOutputSet) -> Self {
        let (dem_rows, dem_cols) = output.artifacts.dem.shape();
        Self {
            id: output.id.to_string(),
            name: output.name.clone(),
            crs: output.artifacts.dem.crs.to_string(),
            paths: output.paths.clone(),
            dem_rows,
            dem_cols,
            flowlines: output.artifacts.flowlines.len(),
            roads: output.artifacts.roads.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Drops every event.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct App<B, E, H, R>
where
    B: BoundaryClient,
    E: SourceFetcher<Artifact = RasterArtifact>,
    H: SourceFetcher<Artifact = VectorArtifact>,
    R: SourceFetcher<Artifact = VectorArtifact>,
{
    boundary: BoundaryIndexCache<B>,
    elevation: E,
    hydrography: H,
    roads: R,
    writer: OutputWriter,
    normalizer: Normalizer,
    options: FetchOptions,
}

impl<B, E, H, R> App<B, E, H, R>
where
    B: BoundaryClient,
    E: SourceFetcher<Artifact = RasterArtifact>,
    H: SourceFetcher<Artifact = VectorArtifact>,
    R: SourceFetcher<Artifact = VectorArtifact>,
{
    pub fn new(
        boundary: BoundaryIndexCache<B>,
        elevation: E,
        hydrography: H,
        roads: R,
        writer: OutputWriter,
        normalizer: Normalizer,
        options: FetchOptions,
    ) -> Self {
        Self {
            boundary,
            elevation,
            hydrography,
            roads,
            writer,
            normalizer,
            options,
        }
    }

    pub fn list_basins(&self, sink: &dyn ProgressSink) -> Result<ListResult, BasinError> {
        sink.event(ProgressEvent {
            message: "phase=Index; loading boundary index".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let basins = self.boundary.list()?;
        sink.event(ProgressEvent {
            message: format!("phase=Index; {} basins", basins.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(ListResult {
            region: self.boundary.region().as_str().to_string(),
            basins,
        })
    }

    pub fn resolve_geometry(&self, id: &BasinId, crs: Crs) -> Result<BasinGeometry, BasinError> {
        self.boundary.resolve(id, crs)
    }

    /// Boundary summary in the projected system.
    pub fn resolve(&self, id: &BasinId, sink: &dyn ProgressSink) -> Result<ResolveResult, BasinError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; basin {id}"),
            elapsed: None,
        });
        let (name, geometry) = self.boundary.lookup(id, self.normalizer.projected())?;
        let bounds = geometry
            .bounding_rect()
            .map(|rect| [rect.min().x, rect.min().y, rect.max().x, rect.max().y])
            .unwrap_or_default();
        Ok(ResolveResult {
            id: id.to_string(),
            name,
            crs: geometry.crs.to_string(),
            polygons: geometry.shape.0.len(),
            bounds,
        })
    }

    /// Resolves the basin, fetches all three sources and persists them.
    /// Nothing is written unless every fetch succeeds.
    pub fn acquire_basin(
        &self,
        id: &BasinId,
        sink: &dyn ProgressSink,
    ) -> Result<BasinOutputSet, BasinError> {
        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; basin {id}"),
            elapsed: None,
        });
        let (name, geometry) = self.boundary.lookup(id, self.normalizer.geographic())?;
        tracing::info!(basin = %id, name = %name, "basin resolved");

        let artifacts = if self.options.concurrent {
            self.fetch_concurrent(&geometry, sink)?
        } else {
            self.fetch_sequential(&geometry, sink)?
        };

        sink.event(ProgressEvent {
            message: format!("phase=Persist; basin {id}"),
            elapsed: Some(start.elapsed()),
        });
        let paths = self.writer.persist(id, &name, &artifacts)?;
        sink.event(ProgressEvent {
            message: format!("phase=Done; {}", paths.dir),
            elapsed: Some(start.elapsed()),
        });

        Ok(BasinOutputSet {
            id: id.clone(),
            name,
            artifacts,
            paths,
        })
    }

    fn fetch_sequential(
        &self,
        geometry: &BasinGeometry,
        sink: &dyn ProgressSink,
    ) -> Result<BasinArtifacts, BasinError> {
        Ok(BasinArtifacts {
            dem: run_fetch(&self.elevation, geometry, sink)?,
            flowlines: run_fetch(&self.hydrography, geometry, sink)?,
            roads: run_fetch(&self.roads, geometry, sink)?,
        })
    }

    /// All three workers are joined before any result is inspected.
    fn fetch_concurrent(
        &self,
        geometry: &BasinGeometry,
        sink: &dyn ProgressSink,
    ) -> Result<BasinArtifacts, BasinError> {
        thread::scope(|scope| {
            let dem = scope.spawn(|| run_fetch(&self.elevation, geometry, sink));
            let flowlines = scope.spawn(|| run_fetch(&self.hydrography, geometry, sink));
            let roads = scope.spawn(|| run_fetch(&self.roads, geometry, sink));

            let dem = join_fetch(dem, self.elevation.data_source());
            let flowlines = join_fetch(flowlines, self.hydrography.data_source());
            let roads = join_fetch(roads, self.roads.data_source());

            Ok(BasinArtifacts {
                dem: dem?,
                flowlines: flowlines?,
                roads: roads?,
            })
        })
    }
}

fn run_fetch<F: SourceFetcher>(
    fetcher: &F,
    geometry: &BasinGeometry,
    sink: &dyn ProgressSink,
) -> Result<F::Artifact, BasinError> {
    let source = fetcher.data_source();
    let start = Instant::now();
    sink.event(ProgressEvent {
        message: format!("phase=Fetch; {source} started"),
        elapsed: None,
    });
    let result = fetcher.fetch(geometry);
    let message = match &result {
        Ok(_) => format!("phase=Fetch; {source} done"),
        Err(err) => {
            tracing::warn!(source = %source, "fetch failed: {err}");
            format!("phase=Fetch; {source} failed")
        }
    };
    sink.event(ProgressEvent {
        message,
        elapsed: Some(start.elapsed()),
    });
    result
}

fn join_fetch<T>(
    handle: ScopedJoinHandle<'_, Result<T, BasinError>>,
    source: DataSource,
) -> Result<T, BasinError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(BasinError::unavailable(source, "fetch worker panicked")))
}
