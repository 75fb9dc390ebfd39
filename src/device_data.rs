// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use crate::network::CommandHeader;

/// Describes the command set of a device that is reached through a [`Network`](`crate::network::Network`).
pub(crate) trait DeviceData {
    type CommandHeader: CommandHeader;
    type CommandEnum;
    fn create_header(
        command_id: &mut u32,
        command: Self::CommandEnum,
        size: usize,
    ) -> Self::CommandHeader;
    fn get_library_version() -> u16;
}
