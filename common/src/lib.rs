// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Primitives shared by the board library and the streaming driver.

pub mod io;
