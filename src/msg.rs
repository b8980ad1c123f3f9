// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// https://tools.ietf.org/html/rfc4253#section-12
pub const DISCONNECT: u8 = 1;
pub const IGNORE: u8 = 2;
pub const UNIMPLEMENTED: u8 = 3;
pub const DEBUG: u8 = 4;

pub const SERVICE_REQUEST: u8 = 5;
pub const SERVICE_ACCEPT: u8 = 6;
pub const KEXINIT: u8 = 20;
pub const NEWKEYS: u8 = 21;

// https://tools.ietf.org/html/rfc4253#section-8
pub const KEXDH_INIT: u8 = 30;
pub const KEXDH_REPLY: u8 = 31;

// Numbers 30-49 are reserved for the key exchange method in use; a guessed
// packet after KEXINIT is always in this range.
// https://tools.ietf.org/html/rfc4251#section-7
pub const KEX_SPECIFIC_FIRST: u8 = 30;
pub const KEX_SPECIFIC_LAST: u8 = 49;

// https://tools.ietf.org/html/rfc4252#section-5.4
pub const USERAUTH_BANNER: u8 = 53;
