// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

mod pool_test;
