//! Static machine catalog.
//!
//! Maps machine ids to display names and capacity classes. Matches the
//! fleet the default edge simulators produce; ids outside the catalog
//! fall back to the raw id and class `M`.

use crate::types::MachineClass;

const CATALOG: &[(&str, &str, MachineClass)] = &[
    ("MACHINE_001", "Turbine A-1", MachineClass::L),
    ("MACHINE_002", "Compressor B-2", MachineClass::M),
    ("MACHINE_003", "Pump C-3", MachineClass::H),
    ("MACHINE_004", "Generator D-4", MachineClass::L),
    ("MACHINE_005", "Cooling Unit E-5", MachineClass::M),
];

/// Display name for a machine id, or the raw id if unknown.
#[must_use]
pub fn machine_name_for(machine_id: &str) -> &str {
    CATALOG
        .iter()
        .find(|(id, _, _)| *id == machine_id)
        .map_or(machine_id, |(_, name, _)| name)
}

/// Capacity class for a machine id; unknown machines default to `M`.
#[must_use]
pub fn machine_class_for(machine_id: &str) -> MachineClass {
    CATALOG
        .iter()
        .find(|(id, _, _)| *id == machine_id)
        .map_or(MachineClass::M, |(_, _, class)| *class)
}
