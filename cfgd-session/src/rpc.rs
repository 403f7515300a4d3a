//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! RPC dispatch: schema lookup by namespace or module, authorisation,
//! encoding conversion, and the round trip to the owning component.

use serde_json::Value;
use tracing::debug;

use cfgd_config::encoding::{self, Encoding};
use cfgd_utils::auth::UserContext;
use cfgd_utils::mgmt::{MgmtError, MgmtErrorList};
use cfgd_utils::path::Path;
use cfgd_yang::{Rpc, View};

use crate::error::Result;
use crate::Shared;

// ===== global functions =====

/// Invokes an RPC. `module_or_ns` is a namespace for the XML/NETCONF
/// encodings and a module name for the JSON ones. The reply is returned
/// in the requested encoding.
pub async fn call_rpc(
    shared: &Shared,
    ctx: &UserContext,
    module_or_ns: &str,
    name: &str,
    args: &str,
    enc: Encoding,
) -> Result<String> {
    // Look up the RPC definition.
    let rpc: &Rpc = match enc {
        Encoding::Xml => {
            shared.schema.rpc_by_namespace(module_or_ns, name)
        }
        Encoding::Json | Encoding::Rfc7951 => {
            shared.schema.rpc_by_module(module_or_ns, name)
        }
    }
    .ok_or_else(|| MgmtError::operation_failed("Unknown RPC"))?;

    // Determine the destination component.
    let component =
        shared.components.for_module(&rpc.module).ok_or_else(|| {
            MgmtError::operation_failed("Unknown model for RPC")
        })?;

    // Authorise before touching the arguments.
    if !shared
        .auther
        .authorize_rpc(ctx, &rpc.module, &rpc.name)
        .await
    {
        return Err(MgmtError::access_denied());
    }

    // Convert the arguments to the component wire encoding (canonical
    // JSON).
    let mut warnings = MgmtErrorList::new();
    let input_tree = match enc {
        Encoding::Xml => encoding::xml_to_node(
            args,
            &rpc.input,
            &Path::root(),
            View::Full,
            &mut warnings,
        )?,
        Encoding::Json | Encoding::Rfc7951 => {
            let value: Value = match args.is_empty() {
                true => Value::Object(Default::default()),
                false => serde_json::from_str(args).map_err(|error| {
                    MgmtError::malformed_message(format!(
                        "Invalid JSON: {error}"
                    ))
                })?,
            };
            encoding::json_to_node(
                &value,
                &rpc.input,
                &Path::root(),
                View::Full,
                &mut warnings,
            )
        }
    };
    if let Some(error) = warnings.into_iter().next() {
        return Err(error);
    }
    let input = encoding::to_json(&input_tree, &rpc.input, false);

    debug!(module = %rpc.module, rpc = %rpc.name, "invoking RPC");
    let reply = component
        .call_rpc(&rpc.module, &rpc.name, &input)
        .await
        .map_err(|error| error.to_mgmt(&rpc.module))?;

    // Convert the reply back to the requested encoding; unknown output
    // nodes are a processing failure, with the offending path attached.
    let mut warnings = MgmtErrorList::new();
    let output_tree = encoding::json_to_node(
        &reply,
        &rpc.output,
        &Path::root(),
        View::Full,
        &mut warnings,
    );
    if let Some(bad) = warnings.iter().next() {
        let mut error = MgmtError::operation_failed(
            "Failed to process returned data",
        );
        error.path = bad.path.clone();
        return Err(error);
    }

    match enc {
        Encoding::Json => Ok(serde_json::to_string(&encoding::to_json(
            &output_tree,
            &rpc.output,
            false,
        ))
        .unwrap()),
        Encoding::Rfc7951 => Ok(serde_json::to_string(
            &encoding::to_json(&output_tree, &rpc.output, true),
        )
        .unwrap()),
        Encoding::Xml => {
            Ok(format!(
                "<rpc-reply>{}</rpc-reply>",
                encoding::to_xml(&output_tree, &rpc.output)
            ))
        }
    }
}
