//! Turns a model file into an unbuilt [`SystemBuilder`].
//!
//! A model file is one RON, TOML or JSON document laid out as in
//! [`crate::schema`]. Every name it uses must be declared earlier in the same
//! file: reservoirs name a fluid, descriptors name reservoirs and variables.
//! Units are parsed with [`Unit::parse`] and dimensions are checked by the
//! builder as each entity is registered.

use std::path::{Path, PathBuf};

use boxmodel_core::descriptor::{Endpoint, Flow, Flux, Process, Reaction};
use boxmodel_core::entity::{Condition, FluidDef, ReservoirDef, VariableDef};
use boxmodel_core::id::{FluidId, ReservoirId, VariableId};
use boxmodel_core::quantity::{Quantity, QuantityError, Unit};
use boxmodel_core::solver::{Solver, SolverConfig, SolverError};
use boxmodel_core::system::{System, SystemBuilder, SystemError};
use tracing::{debug, info};

use crate::schema::{ConditionData, ModelData, QuantityData, SolverData};

/// Base name of the model file looked up by [`load_model_dir`].
pub const MODEL_FILE: &str = "model";

// ===========================================================================
// Errors
// ===========================================================================

/// Why a model file could not be turned into a system.
#[derive(Debug, thiserror::Error)]
pub enum ModelFileError {
    #[error("no {MODEL_FILE}.ron, {MODEL_FILE}.toml or {MODEL_FILE}.json in {dir}")]
    NotFound { dir: PathBuf },

    /// More than one `model.*` file in the same directory.
    #[error("model defined twice, in {first} and in {second}")]
    Ambiguous { first: PathBuf, second: PathBuf },

    #[error("model file {file} must end in .ron, .toml or .json")]
    UnknownExtension { file: PathBuf },

    #[error("cannot read model file {file}: {source}")]
    Read {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model file {file} is not a valid {format:?} model: {detail}")]
    Syntax {
        file: PathBuf,
        format: ModelFormat,
        detail: String,
    },

    /// A fluid, reservoir or variable used before (or without) being declared.
    #[error("model file {file} refers to undeclared {kind} '{name}'")]
    Undeclared {
        file: PathBuf,
        kind: &'static str,
        name: String,
    },

    #[error("model file {file} declares {kind} '{name}' twice")]
    Redeclared {
        file: PathBuf,
        kind: &'static str,
        name: String,
    },

    #[error("model file {file}: bad unit on '{quantity}': {source}")]
    Unit {
        file: PathBuf,
        quantity: String,
        #[source]
        source: QuantityError,
    },

    /// The builder rejected what the file describes, e.g. a rate with the
    /// wrong dimension.
    #[error("model file {file} describes an invalid system: {source}")]
    InvalidSystem {
        file: PathBuf,
        #[source]
        source: SystemError,
    },

    #[error("model file {file} has unusable solver settings: {source}")]
    InvalidSolver {
        file: PathBuf,
        #[source]
        source: SolverError,
    },
}

// ===========================================================================
// Reading
// ===========================================================================

/// Text formats a model file may be written in, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Ron,
    Toml,
    Json,
}

impl ModelFormat {
    /// Lookup order for [`locate_model_file`].
    pub const ALL: [ModelFormat; 3] = [ModelFormat::Ron, ModelFormat::Toml, ModelFormat::Json];

    pub fn extension(self) -> &'static str {
        match self {
            ModelFormat::Ron => "ron",
            ModelFormat::Toml => "toml",
            ModelFormat::Json => "json",
        }
    }

    /// Format implied by the extension of `path`, if any.
    pub fn of(path: &Path) -> Option<ModelFormat> {
        let ext = path.extension()?;
        Self::ALL.into_iter().find(|f| ext == f.extension())
    }

    fn parse(self, text: &str) -> Result<ModelData, String> {
        match self {
            ModelFormat::Ron => ron::from_str(text).map_err(|e| e.to_string()),
            ModelFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            ModelFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

/// The single `model.{ron,toml,json}` in `dir`.
pub fn locate_model_file(dir: &Path) -> Result<PathBuf, ModelFileError> {
    let mut present = ModelFormat::ALL
        .into_iter()
        .map(|f| dir.join(MODEL_FILE).with_extension(f.extension()))
        .filter(|p| p.is_file());
    let first = present.next().ok_or_else(|| ModelFileError::NotFound {
        dir: dir.to_path_buf(),
    })?;
    match present.next() {
        Some(second) => Err(ModelFileError::Ambiguous { first, second }),
        None => Ok(first),
    }
}

/// Parse a model file without resolving any names.
pub fn read_model_file(path: &Path) -> Result<ModelData, ModelFileError> {
    let format = ModelFormat::of(path).ok_or_else(|| ModelFileError::UnknownExtension {
        file: path.to_path_buf(),
    })?;
    let text = std::fs::read_to_string(path).map_err(|source| ModelFileError::Read {
        file: path.to_path_buf(),
        source,
    })?;
    format.parse(&text).map_err(|detail| ModelFileError::Syntax {
        file: path.to_path_buf(),
        format,
        detail,
    })
}

// ===========================================================================
// Resolution
// ===========================================================================

/// A model resolved from a file. The builder is returned unbuilt so callers
/// can register state-dependent rates before building.
#[derive(Debug)]
pub struct LoadedModel {
    pub builder: SystemBuilder,
    pub solver: Option<SolverConfig>,
}

impl LoadedModel {
    pub fn build(self) -> Result<(System, Option<SolverConfig>), SystemError> {
        Ok((self.builder.build()?, self.solver))
    }
}

/// `value * unit` for one quantity of the file; `what` names it in errors.
fn quantity(file: &Path, data: &QuantityData, what: &str) -> Result<Quantity, ModelFileError> {
    let unit = Unit::parse(&data.unit).map_err(|source| ModelFileError::Unit {
        file: file.to_path_buf(),
        quantity: what.to_string(),
        source,
    })?;
    Ok(data.value * unit)
}

fn condition(file: &Path, data: &ConditionData) -> Result<Condition, ModelFileError> {
    data.iter()
        .map(|(name, q)| Ok((name.clone(), quantity(file, q, name)?)))
        .collect()
}

/// Registers a model's declarations in file order, looking names up in the
/// builder's own registries.
struct Resolver<'a> {
    file: &'a Path,
    builder: SystemBuilder,
}

impl Resolver<'_> {
    fn undeclared(&self, kind: &'static str, name: &str) -> ModelFileError {
        ModelFileError::Undeclared {
            file: self.file.to_path_buf(),
            kind,
            name: name.to_string(),
        }
    }

    fn rejected(&self, e: SystemError) -> ModelFileError {
        let file = self.file.to_path_buf();
        match e {
            SystemError::Duplicate { kind, name } => ModelFileError::Redeclared { file, kind, name },
            source => ModelFileError::InvalidSystem { file, source },
        }
    }

    fn fluid(&self, name: &str) -> Result<FluidId, ModelFileError> {
        self.builder
            .fluid_id(name)
            .ok_or_else(|| self.undeclared("fluid", name))
    }

    fn reservoir(&self, name: &str) -> Result<ReservoirId, ModelFileError> {
        self.builder
            .reservoir_id(name)
            .ok_or_else(|| self.undeclared("reservoir", name))
    }

    fn variable(&self, name: &str) -> Result<VariableId, ModelFileError> {
        self.builder
            .variable_id(name)
            .ok_or_else(|| self.undeclared("variable", name))
    }

    /// An absent name is the outside world.
    fn endpoint(&self, name: Option<&str>) -> Result<Endpoint, ModelFileError> {
        name.map_or(Ok(Endpoint::External), |n| {
            self.reservoir(n).map(Endpoint::Reservoir)
        })
    }

    fn quantity(&self, data: &QuantityData, what: &str) -> Result<Quantity, ModelFileError> {
        quantity(self.file, data, what)
    }

    fn declare_entities(&mut self, data: &ModelData) -> Result<(), ModelFileError> {
        for fluid in &data.fluids {
            let mut def = FluidDef::new(&fluid.name, self.quantity(&fluid.density, &fluid.name)?);
            if let Some(description) = &fluid.description {
                def = def.with_description(description);
            }
            self.builder.register_fluid(def).map_err(|e| self.rejected(e))?;
        }

        for variable in &data.variables {
            let mut def = VariableDef::new(&variable.name);
            if !variable.mobile {
                def = def.immobile();
            }
            if let Some(description) = &variable.description {
                def = def.with_description(description);
            }
            self.builder.register_variable(def).map_err(|e| self.rejected(e))?;
        }

        for reservoir in &data.reservoirs {
            let mut def = ReservoirDef::new(
                &reservoir.name,
                self.fluid(&reservoir.fluid)?,
                self.quantity(&reservoir.fluid_mass, &reservoir.name)?,
            );
            for (name, mass) in &reservoir.variables {
                def = def.with_variable_mass(self.variable(name)?, self.quantity(mass, name)?);
            }
            if let Some(local) = &reservoir.condition {
                def = def.with_condition(condition(self.file, local)?);
            }
            if let Some(description) = &reservoir.description {
                def = def.with_description(description);
            }
            self.builder.register_reservoir(def).map_err(|e| self.rejected(e))?;
        }
        Ok(())
    }

    fn declare_descriptors(&mut self, data: &ModelData) -> Result<(), ModelFileError> {
        for flow in &data.flows {
            let mut descriptor = Flow::new(
                &flow.name,
                self.endpoint(flow.source.as_deref())?,
                self.endpoint(flow.target.as_deref())?,
                self.quantity(&flow.rate, &flow.name)?,
            );
            if !flow.tracer_transport {
                descriptor = descriptor.without_tracers();
            }
            for (name, c) in &flow.inflow_concentrations {
                descriptor = descriptor
                    .with_inflow_concentration(self.variable(name)?, self.quantity(c, name)?);
            }
            self.builder.register_flow(descriptor).map_err(|e| self.rejected(e))?;
        }

        for flux in &data.fluxes {
            let descriptor = Flux::new(
                &flux.name,
                self.endpoint(flux.source.as_deref())?,
                self.endpoint(flux.target.as_deref())?,
                self.variable(&flux.variable)?,
                self.quantity(&flux.rate, &flux.name)?,
            );
            self.builder.register_flux(descriptor).map_err(|e| self.rejected(e))?;
        }

        for process in &data.processes {
            let descriptor = Process::new(
                &process.name,
                self.reservoir(&process.reservoir)?,
                self.variable(&process.variable)?,
                self.quantity(&process.rate, &process.name)?,
            );
            self.builder.register_process(descriptor).map_err(|e| self.rejected(e))?;
        }

        for reaction in &data.reactions {
            let coefficients = reaction
                .coefficients
                .iter()
                .map(|(name, c)| Ok((self.variable(name)?, *c)))
                .collect::<Result<Vec<_>, ModelFileError>>()?;
            let descriptor = Reaction::new(
                &reaction.name,
                self.reservoir(&reaction.reservoir)?,
                coefficients,
                self.quantity(&reaction.rate, &reaction.name)?,
            );
            self.builder.register_reaction(descriptor).map_err(|e| self.rejected(e))?;
        }
        Ok(())
    }

    fn solver(&self, data: &SolverData) -> Result<SolverConfig, ModelFileError> {
        let config = SolverConfig::new(self.quantity(&data.timestep, "solver.timestep")?, data.steps)
            .with_scheme(data.scheme)
            .with_negative_mass(data.negative_mass);
        Solver::new(config).map_err(|source| ModelFileError::InvalidSolver {
            file: self.file.to_path_buf(),
            source,
        })?;
        Ok(config)
    }
}

/// Resolve every name in `data` and register the result on a fresh builder.
/// `file` is only used in error reports.
pub fn resolve_model(data: &ModelData, file: &Path) -> Result<LoadedModel, ModelFileError> {
    let mut resolver = Resolver {
        file,
        builder: SystemBuilder::new(condition(file, &data.condition)?),
    };
    resolver.declare_entities(data)?;
    resolver.declare_descriptors(data)?;
    let solver = data
        .solver
        .as_ref()
        .map(|s| resolver.solver(s))
        .transpose()?;

    debug!(
        file = %file.display(),
        fluids = data.fluids.len(),
        variables = data.variables.len(),
        reservoirs = data.reservoirs.len(),
        has_solver = solver.is_some(),
        "resolved model"
    );
    Ok(LoadedModel {
        builder: resolver.builder,
        solver,
    })
}

// ===========================================================================
// Entry points
// ===========================================================================

/// Load and resolve a model from a single RON, TOML or JSON file.
pub fn load_model(path: &Path) -> Result<LoadedModel, ModelFileError> {
    let model = resolve_model(&read_model_file(path)?, path)?;
    info!(file = %path.display(), "loaded model");
    Ok(model)
}

/// Load `model.{ron,toml,json}` from `dir`.
pub fn load_model_dir(dir: &Path) -> Result<LoadedModel, ModelFileError> {
    load_model(&locate_model_file(dir)?)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use boxmodel_core::quantity::{KELVIN, KILOGRAM, YEAR};
    use boxmodel_core::solver::IntegrationScheme;
    use std::fs;
    use tempfile::TempDir;

    const LAKE_RON: &str = r#"
#![enable(implicit_some)]
(
    condition: {"T": (value: 295.0, unit: "K")},
    fluids: [(name: "water", density: (value: 1000.0, unit: "kg/m^3"))],
    variables: [(name: "salt", description: "dissolved salt")],
    reservoirs: [
        (
            name: "lake",
            fluid: "water",
            fluid_mass: (value: 1e5, unit: "kg"),
            variables: {"salt": (value: 2.0, unit: "kg")},
            condition: {"T": (value: 290.0, unit: "K")},
        ),
    ],
    flows: [
        (
            name: "inflow",
            target: "lake",
            rate: (value: 1000.0, unit: "kg/year"),
            inflow_concentrations: {"salt": (value: 1.0, unit: "g/kg")},
        ),
        (name: "outflow", source: "lake", rate: (value: 1000.0, unit: "kg/year")),
    ],
    solver: (timestep: (value: 1.0, unit: "year"), steps: 4),
)
"#;

    const TANK_JSON: &str = r#"{
        "fluids": [{"name": "water", "density": {"value": 1000, "unit": "kg/m^3"}}],
        "reservoirs": [{"name": "tank", "fluid": "water", "fluid_mass": {"value": 10, "unit": "kg"}}]
    }"#;

    /// Resolve a variant of the lake model, reporting errors against `lake.ron`.
    fn resolve_lake(src: &str) -> Result<LoadedModel, ModelFileError> {
        let data = ModelFormat::Ron.parse(src).unwrap();
        resolve_model(&data, Path::new("lake.ron"))
    }

    fn dir_with(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            fs::write(dir.path().join(name), body).unwrap();
        }
        dir
    }

    // -----------------------------------------------------------------------
    // Formats and lookup
    // -----------------------------------------------------------------------

    #[test]
    fn format_follows_extension() {
        assert_eq!(ModelFormat::of(Path::new("ocean.ron")), Some(ModelFormat::Ron));
        assert_eq!(ModelFormat::of(Path::new("ocean.toml")), Some(ModelFormat::Toml));
        assert_eq!(ModelFormat::of(Path::new("ocean.json")), Some(ModelFormat::Json));
        assert_eq!(ModelFormat::of(Path::new("ocean.yaml")), None);
        assert_eq!(ModelFormat::of(Path::new("ocean")), None);
    }

    #[test]
    fn locate_single_model_file() {
        let dir = dir_with(&[("model.toml", ""), ("notes.json", "{}")]);
        assert_eq!(
            locate_model_file(dir.path()).unwrap(),
            dir.path().join("model.toml")
        );
    }

    #[test]
    fn empty_dir_has_no_model() {
        let dir = dir_with(&[]);
        let err = locate_model_file(dir.path()).unwrap_err();
        assert!(matches!(err, ModelFileError::NotFound { .. }));
        assert!(err.to_string().contains("model.ron, model.toml or model.json"));
    }

    #[test]
    fn two_model_files_are_ambiguous() {
        let dir = dir_with(&[("model.ron", "()"), ("model.json", "{}")]);
        match locate_model_file(dir.path()) {
            Err(ModelFileError::Ambiguous { first, second }) => {
                assert_eq!(first, dir.path().join("model.ron"));
                assert_eq!(second, dir.path().join("model.json"));
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    #[test]
    fn syntax_error_names_file_and_format() {
        let dir = dir_with(&[("model.ron", "this is not a box model {{{")]);
        let path = dir.path().join("model.ron");
        let err = read_model_file(&path).unwrap_err();
        assert!(matches!(
            err,
            ModelFileError::Syntax { format: ModelFormat::Ron, ref file, .. } if *file == path
        ));
        assert!(err.to_string().contains("not a valid Ron model"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = dir_with(&[]);
        let path = dir.path().join("ocean.json");
        let err = load_model(&path).unwrap_err();
        assert!(matches!(err, ModelFileError::Read { .. }));
        assert!(err.to_string().starts_with("cannot read model file"));
    }

    #[test]
    fn unknown_extension_is_rejected_before_reading() {
        let err = read_model_file(Path::new("/nonexistent/ocean.yaml")).unwrap_err();
        assert!(matches!(err, ModelFileError::UnknownExtension { .. }));
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    #[test]
    fn resolves_lake_model() {
        let (system, solver) = resolve_lake(LAKE_RON).unwrap().build().unwrap();

        assert_eq!(system.global_condition().get("T"), Some(295.0 * KELVIN));
        let lake = system.reservoir_by_name("lake").unwrap();
        assert_eq!(lake.condition().get("T"), Some(290.0 * KELVIN));
        assert_eq!(lake.fluid_mass(), 1e5 * KILOGRAM);

        let salt = system.variable_id("salt").unwrap();
        assert_eq!(lake.variable_mass(salt).unwrap(), 2.0 * KILOGRAM);
        assert_eq!(
            system.variable(salt).unwrap().description.as_deref(),
            Some("dissolved salt")
        );
        assert_eq!(system.flows().len(), 2);
        assert!(system.flows()[1].target.is_external());
        assert!((system.flows()[0].inflow_concentration(salt) - 1e-3).abs() < 1e-15);

        let solver = solver.unwrap();
        assert_eq!(solver.steps, 4);
        assert_eq!(solver.timestep, 1.0 * YEAR);
        assert_eq!(solver.scheme, IntegrationScheme::ExplicitEuler);
    }

    #[test]
    fn undeclared_inflow_variable() {
        let src = LAKE_RON.replace(r#"{"salt": (value: 1.0"#, r#"{"sugar": (value: 1.0"#);
        let err = resolve_lake(&src).unwrap_err();
        assert!(matches!(
            err,
            ModelFileError::Undeclared { ref name, kind: "variable", .. } if name == "sugar"
        ));
        assert_eq!(
            err.to_string(),
            "model file lake.ron refers to undeclared variable 'sugar'"
        );
    }

    #[test]
    fn undeclared_fluid() {
        let src = LAKE_RON.replace(r#"fluid: "water""#, r#"fluid: "brine""#);
        assert!(matches!(
            resolve_lake(&src),
            Err(ModelFileError::Undeclared { kind: "fluid", .. })
        ));
    }

    #[test]
    fn redeclared_flow_names_kind_and_file() {
        let src = LAKE_RON.replace(r#"name: "outflow""#, r#"name: "inflow""#);
        match resolve_lake(&src).unwrap_err() {
            ModelFileError::Redeclared { file, kind, name } => {
                assert_eq!(file, PathBuf::from("lake.ron"));
                assert_eq!(kind, "flow");
                assert_eq!(name, "inflow");
            }
            other => panic!("expected Redeclared, got {other:?}"),
        }
    }

    #[test]
    fn bad_unit_names_the_quantity() {
        let src = LAKE_RON.replace(r#"(name: "outflow", source: "lake", rate: (value: 1000.0, unit: "kg/year"))"#,
            r#"(name: "outflow", source: "lake", rate: (value: 1000.0, unit: "furlongs"))"#);
        let err = resolve_lake(&src).unwrap_err();
        assert!(matches!(
            err,
            ModelFileError::Unit { ref quantity, .. } if quantity == "outflow"
        ));
        assert!(err.to_string().contains("furlongs"));
    }

    #[test]
    fn mass_where_rate_expected_is_an_invalid_system() {
        let src = LAKE_RON.replace(r#"(value: 1000.0, unit: "kg/year")"#, r#"(value: 1000.0, unit: "kg")"#);
        let err = resolve_lake(&src).unwrap_err();
        assert!(matches!(
            err,
            ModelFileError::InvalidSystem {
                source: SystemError::Quantity(_),
                ..
            }
        ));
    }

    #[test]
    fn zero_timestep_is_unusable() {
        let src = LAKE_RON.replace(
            r#"timestep: (value: 1.0, unit: "year")"#,
            r#"timestep: (value: 0.0, unit: "year")"#,
        );
        assert!(matches!(
            resolve_lake(&src),
            Err(ModelFileError::InvalidSolver {
                source: SolverError::InvalidTimestep(_),
                ..
            })
        ));
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    #[test]
    fn load_model_dir_reads_json() {
        let dir = dir_with(&[("model.json", TANK_JSON)]);
        let (system, solver) = load_model_dir(dir.path()).unwrap().build().unwrap();
        assert_eq!(system.reservoir_count(), 1);
        assert_eq!(system.reservoir_by_name("tank").unwrap().fluid_mass(), 10.0 * KILOGRAM);
        assert!(solver.is_none());
    }
}
