//! Running compiled exports on the host trampoline.

use anyhow::{Context, bail};
use caldera_hir::{HirProgram, Ty, TypeId};
use caldera_host::Value;

/// Parameter types of the exported function `export`.
pub fn export_params<'p>(program: &'p HirProgram, export: &str) -> anyhow::Result<&'p [TypeId]> {
    let function = program
        .functions
        .iter()
        .find(|function| program.symbol_name(function.symbol) == export)
        .with_context(|| format!("no function named `{export}`"))?;
    if !function.exported {
        bail!("`{export}` is not exported");
    }
    let (params, _, _) = program
        .function_signature(function.ty)
        .with_context(|| format!("`{export}` does not have a function type"))?;
    Ok(params)
}

/// Decodes command-line arguments against the parameters of `export`.
pub fn parse_args(program: &HirProgram, export: &str, args: &[String]) -> anyhow::Result<Vec<Value>> {
    let params = export_params(program, export)?;
    if params.len() != args.len() {
        bail!(
            "`{export}` takes {} argument(s), {} given",
            params.len(),
            args.len()
        );
    }
    params
        .iter()
        .zip(args)
        .map(|(ty, text)| parse_value(program.ty(*ty), text))
        .collect()
}

fn parse_value(ty: &Ty, text: &str) -> anyhow::Result<Value> {
    let value = match ty {
        Ty::Unit if text == "()" => Value::Unit,
        Ty::Unit => bail!("expected `()`, got `{text}`"),
        Ty::Bool => Value::Bool(text.parse().with_context(|| format!("expected a bool, got `{text}`"))?),
        Ty::Int => Value::Int(text.parse().with_context(|| format!("expected an Int, got `{text}`"))?),
        Ty::Int64 => Value::Int64(text.parse().with_context(|| format!("expected an Int64, got `{text}`"))?),
        Ty::Float => Value::Float(text.parse().with_context(|| format!("expected a Float, got `{text}`"))?),
        Ty::Tuple { .. } | Ty::Record { .. } | Ty::Function { .. } => {
            bail!("non-scalar arguments cannot be passed from the command line")
        }
    };
    Ok(value)
}

/// Instantiates `artifact` and runs `export` with the given handlers.
#[cfg(feature = "wasmtime")]
pub async fn run_export(
    artifact: &caldera_wasm_backend::WasmArtifact,
    registry: caldera_host::HandlerRegistry,
    export: &str,
    args: &[Value],
) -> anyhow::Result<Value> {
    let mut instance = caldera_host::WasmtimeInstance::new(&artifact.bytes)?;
    let value = caldera_host::Trampoline::new(registry)
        .run(&mut instance, export, args)
        .await?;
    Ok(value)
}
