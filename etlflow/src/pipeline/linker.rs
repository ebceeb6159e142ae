//! Validation and wiring of a pipeline's block chain.

use crate::blocks::{effective_options, Block, LinkContext, Outlet, PortType, UnitOfWork};
use crate::core::StageKind;
use crate::errors::ConfigurationError;
use std::collections::VecDeque;
use tracing::debug;

/// A consumer still waiting for its producer during the backward walk.
struct PendingConsumer {
    position: usize,
    type_name: String,
    port: PortType,
}

/// Checks that every producer feeds the nearest following data block and
/// that block consumes exactly what it produces.
///
/// The walk starts at the tail. Task blocks have no ports and are skipped.
///
/// # Errors
///
/// Returns [`ConfigurationError::TooFewBlocks`] for fewer than two blocks and
/// [`ConfigurationError::IncompatibleAdjacency`] naming the offending
/// position otherwise.
pub fn validate_chain(blocks: &[Block]) -> Result<(), ConfigurationError> {
    if blocks.len() < 2 {
        return Err(ConfigurationError::TooFewBlocks {
            count: blocks.len(),
        });
    }

    let mut pending: Option<PendingConsumer> = None;
    for (position, block) in blocks.iter().enumerate().rev() {
        if block.kind() == StageKind::Task {
            continue;
        }

        match (block.produces(), pending.take()) {
            (Some(port), Some(consumer)) if port == consumer.port => {}
            (Some(port), Some(consumer)) => {
                return Err(ConfigurationError::IncompatibleAdjacency {
                    position: consumer.position,
                    type_name: consumer.type_name,
                    reason: format!(
                        "expects {} but the block at position {position} produces {port}",
                        consumer.port
                    ),
                });
            }
            (Some(port), None) => {
                return Err(ConfigurationError::IncompatibleAdjacency {
                    position,
                    type_name: block.type_name(),
                    reason: format!("produces {port} but no following block consumes it"),
                });
            }
            (None, Some(consumer)) => {
                return Err(ConfigurationError::IncompatibleAdjacency {
                    position: consumer.position,
                    type_name: consumer.type_name,
                    reason: format!(
                        "expects {} but the {} block at position {position} emits no records",
                        consumer.port,
                        block.kind()
                    ),
                });
            }
            (None, None) => {}
        }

        pending = block.consumes().map(|port| PendingConsumer {
            position,
            type_name: block.type_name(),
            port,
        });
    }

    match pending {
        Some(consumer) => Err(ConfigurationError::IncompatibleAdjacency {
            position: consumer.position,
            type_name: consumer.type_name,
            reason: format!("expects {} but has no upstream block", consumer.port),
        }),
        None => Ok(()),
    }
}

/// Validates and wires `blocks` into executable units, one per block, in
/// declaration order.
///
/// Wiring runs from the tail backward: each consumer opens its inbound
/// channel, and the sending half is handed to the nearest preceding producer.
///
/// # Errors
///
/// Returns the validation error of [`validate_chain`], or
/// [`ConfigurationError::Connect`] when two blocks cannot be connected.
pub fn link_blocks(
    mut blocks: VecDeque<Block>,
    ctx: &LinkContext,
) -> Result<Vec<UnitOfWork>, ConfigurationError> {
    validate_chain(blocks.make_contiguous())?;

    let mut units = VecDeque::with_capacity(blocks.len());
    let mut downstream: Option<Outlet> = None;
    let mut position = blocks.len();

    while let Some(mut block) = blocks.pop_back() {
        position -= 1;

        if block.kind() != StageKind::Task {
            if block.produces().is_some() {
                let outlet = downstream.take().ok_or_else(|| ConfigurationError::Connect {
                    position,
                    type_name: block.type_name(),
                    reason: "no downstream inlet was opened".to_string(),
                })?;
                block
                    .connect(outlet)
                    .map_err(|reason| ConfigurationError::Connect {
                        position,
                        type_name: block.type_name(),
                        reason,
                    })?;
            }
            if block.consumes().is_some() {
                let capacity = effective_options(block.options(), ctx).channel_capacity;
                downstream = block.open_inlet(capacity);
            }
        }

        let unit = block.into_unit(ctx).map_err(|e| e.at_position(position))?;
        units.push_front(unit);
    }

    debug!(pipeline = %ctx.pipeline, units = units.len(), "Linked block chain");
    Ok(units.into())
}
